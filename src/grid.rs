//! Tile addressing for a raster partitioned into fixed-size tiles.
//!
//! Tiles are numbered in row-major order: index `ty * tiles_x + tx`. Border
//! tiles on the rightmost column and bottom row may be partially outside the
//! raster; [`TileGrid::tile_data_size`] reports their clipped size.

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Dense row-major tile index in `[0, tile_count)`.
pub type TileIndex = u64;

/// Geometry of a tiled raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    /// Raster width in pixels
    pub width: u64,

    /// Raster height in pixels
    pub height: u64,

    /// Width of each tile in pixels
    pub tile_width: u32,

    /// Height of each tile in pixels
    pub tile_height: u32,

    /// Number of tiles in X direction
    pub tiles_x: u64,

    /// Number of tiles in Y direction
    pub tiles_y: u64,
}

impl TileGrid {
    /// Create the grid for a raster of `width × height` pixels.
    ///
    /// Tile dimensions of zero are treated as one pixel.
    pub fn new(width: u64, height: u64, tile_width: u32, tile_height: u32) -> Self {
        let tile_width = tile_width.max(1);
        let tile_height = tile_height.max(1);
        Self {
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width as u64),
            tiles_y: height.div_ceil(tile_height as u64),
        }
    }

    /// Number of tiles needed to cover a raster of the given size.
    pub fn tile_count_for(width: u64, height: u64, tile_width: u32, tile_height: u32) -> u64 {
        Self::new(width, height, tile_width, tile_height).tile_count()
    }

    pub fn tile_count(&self) -> u64 {
        self.tiles_x * self.tiles_y
    }

    pub fn raster_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Index of the tile containing pixel `(x, y)`.
    pub fn index_of(&self, x: i64, y: i64) -> Option<TileIndex> {
        if x < 0 || y < 0 || x as u64 >= self.width || y as u64 >= self.height {
            return None;
        }
        let tx = x as u64 / self.tile_width as u64;
        let ty = y as u64 / self.tile_height as u64;
        Some(ty * self.tiles_x + tx)
    }

    /// Pixel origin of a tile.
    pub fn position_of(&self, index: TileIndex) -> Option<(i64, i64)> {
        if index >= self.tile_count() {
            return None;
        }
        let tx = index % self.tiles_x;
        let ty = index / self.tiles_x;
        Some((
            (tx * self.tile_width as u64) as i64,
            (ty * self.tile_height as u64) as i64,
        ))
    }

    /// Full (unclipped) rectangle of a tile in raster coordinates.
    pub fn tile_rect(&self, index: TileIndex) -> Option<Rect> {
        let (x, y) = self.position_of(index)?;
        Some(Rect::new(
            x,
            y,
            self.tile_width as u64,
            self.tile_height as u64,
        ))
    }

    /// Size of the tile's pixel data clipped to the raster extent.
    pub fn tile_data_size(&self, index: TileIndex) -> Option<(u32, u32)> {
        let rect = self.tile_rect(index)?.intersect(&self.raster_rect())?;
        Some((rect.width() as u32, rect.height() as u32))
    }

    /// Whether the tile is on the rightmost column or bottom row.
    pub fn is_border(&self, index: TileIndex) -> bool {
        index < self.tile_count()
            && (index % self.tiles_x == self.tiles_x - 1 || index / self.tiles_x == self.tiles_y - 1)
    }

    /// Enumerate the tiles overlapping `rect`, row-major.
    pub fn tiles_in(&self, rect: &Rect) -> TileIter {
        let Some(clipped) = rect.intersect(&self.raster_rect()) else {
            return TileIter::empty();
        };
        let tw = self.tile_width as i64;
        let th = self.tile_height as i64;
        TileIter {
            tiles_x: self.tiles_x,
            tx0: (clipped.x0 / tw) as u64,
            tx1: ((clipped.x1 - 1) / tw) as u64,
            ty1: ((clipped.y1 - 1) / th) as u64,
            tx: (clipped.x0 / tw) as u64,
            ty: (clipped.y0 / th) as u64,
            done: false,
        }
    }
}

/// Row-major iterator over the tiles of a rectangle.
#[derive(Debug, Clone)]
pub struct TileIter {
    tiles_x: u64,
    tx0: u64,
    tx1: u64,
    ty1: u64,
    tx: u64,
    ty: u64,
    done: bool,
}

impl TileIter {
    fn empty() -> Self {
        Self {
            tiles_x: 0,
            tx0: 0,
            tx1: 0,
            ty1: 0,
            tx: 0,
            ty: 0,
            done: true,
        }
    }
}

impl Iterator for TileIter {
    type Item = TileIndex;

    fn next(&mut self) -> Option<TileIndex> {
        if self.done {
            return None;
        }
        let index = self.ty * self.tiles_x + self.tx;
        if self.tx < self.tx1 {
            self.tx += 1;
        } else if self.ty < self.ty1 {
            self.tx = self.tx0;
            self.ty += 1;
        } else {
            self.done = true;
        }
        Some(index)
    }
}

// =============================================================================
// Tests
// =============================================================================
