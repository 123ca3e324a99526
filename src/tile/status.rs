//! Out-of-band per-tile status bits.
//!
//! Each tile gets two flags packed into a byte array (four tiles per byte):
//! - bit 0: a clear is pending and must be applied when the tile is next loaded
//! - bit 1: the tile changed and lower resolutions derived from it are stale
//!
//! The table lives beside the tile map rather than inside each resident tile so
//! the flags survive eviction.

use crate::error::RasterError;
use crate::grid::TileIndex;

const BITS_PER_TILE: u64 = 2;
const CLEAR_BIT: u8 = 0b01;
const DIRTY_FOR_SUB_RES_BIT: u8 = 0b10;

/// Packed per-tile status flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileStatusTable {
    bits: Vec<u8>,
    tile_count: u64,
    enabled: bool,
}

impl TileStatusTable {
    /// An enabled table with storage for `tile_count` tiles.
    pub fn new(tile_count: u64) -> Self {
        let mut table = Self::default();
        table.allocate(tile_count);
        table
    }

    /// A table that never records anything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Zero-initialise storage for `tile_count` tiles and enable tracking.
    pub fn allocate(&mut self, tile_count: u64) {
        let bytes = (tile_count * BITS_PER_TILE).div_ceil(8) as usize;
        self.bits = vec![0; bytes];
        self.tile_count = tile_count;
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tile_count(&self) -> u64 {
        self.tile_count
    }

    /// Size of the packed storage in bytes.
    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    pub fn clear_flag(&self, index: TileIndex) -> Result<bool, RasterError> {
        self.get(index, CLEAR_BIT)
    }

    pub fn set_clear_flag(&mut self, index: TileIndex, value: bool) -> Result<(), RasterError> {
        self.set(index, CLEAR_BIT, value)
    }

    pub fn dirty_for_sub_res_flag(&self, index: TileIndex) -> Result<bool, RasterError> {
        self.get(index, DIRTY_FOR_SUB_RES_BIT)
    }

    pub fn set_dirty_for_sub_res_flag(
        &mut self,
        index: TileIndex,
        value: bool,
    ) -> Result<(), RasterError> {
        self.set(index, DIRTY_FOR_SUB_RES_BIT, value)
    }

    /// Byte offset and bit shift for a tile, or an error past the end.
    fn locate(&self, index: TileIndex) -> Result<(usize, u32), RasterError> {
        if index >= self.tile_count {
            return Err(RasterError::OutOfRange {
                index,
                tile_count: self.tile_count,
            });
        }
        let bit = index * BITS_PER_TILE;
        Ok(((bit / 8) as usize, (bit % 8) as u32))
    }

    fn get(&self, index: TileIndex, mask: u8) -> Result<bool, RasterError> {
        if !self.enabled {
            return Ok(false);
        }
        let (byte, shift) = self.locate(index)?;
        Ok(self.bits[byte] & (mask << shift) != 0)
    }

    fn set(&mut self, index: TileIndex, mask: u8, value: bool) -> Result<(), RasterError> {
        if !self.enabled {
            return Ok(());
        }
        let (byte, shift) = self.locate(index)?;
        if value {
            self.bits[byte] |= mask << shift;
        } else {
            self.bits[byte] &= !(mask << shift);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
