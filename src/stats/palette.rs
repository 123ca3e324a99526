use serde::{Deserialize, Serialize};

use crate::canvas::BufferAllocator;
use crate::error::RasterError;

/// Quantization grid: 5 bits per colour channel.
const QUANT_BITS: u32 = 5;
const QUANT_LEVELS: usize = 1 << QUANT_BITS;
const BUCKET_COUNT: usize = QUANT_LEVELS * QUANT_LEVELS * QUANT_LEVELS;

/// Upper bound on palette size.
pub const MAX_PALETTE_ENTRIES: usize = 256;

/// Parameters for a representative-palette request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteParams {
    /// Maximum number of colours in the result (1-256)
    pub max_entries: usize,

    /// Percentage of tiles to sample (1-100)
    pub tiles_to_scan_percentage: u8,

    /// Weight each tile colour by its pixel count instead of counting it once
    pub weighted: bool,

    /// Existing palette of the target pixel type; seeds the accumulator
    pub target_palette: Vec<[u8; 4]>,
}

impl Default for PaletteParams {
    fn default() -> Self {
        Self {
            max_entries: MAX_PALETTE_ENTRIES,
            tiles_to_scan_percentage: 100,
            weighted: true,
            target_palette: Vec::new(),
        }
    }
}

impl PaletteParams {
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }
}

/// A reduced palette with the pixel count behind each entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentativePalette {
    pub colors: Vec<[u8; 4]>,
    pub counts: Vec<u64>,
}

impl RepresentativePalette {
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    count: u64,
    sum: [u64; 4],
}

/// Popularity quantizer over an RGB555 grid.
///
/// Colours falling into the same grid cell are averaged; the most populated
/// cells become the palette. The bucket table is allocated up front through a
/// [`BufferAllocator`] and released when the accumulator is dropped.
pub struct PaletteAccumulator {
    buckets: Vec<Bucket>,
}

impl PaletteAccumulator {
    /// Allocate the bucket table and seed it with `seed` colours.
    pub fn try_new(
        allocator: &dyn BufferAllocator,
        seed: &[[u8; 4]],
    ) -> Result<Self, RasterError> {
        let bytes = BUCKET_COUNT * std::mem::size_of::<Bucket>();
        allocator.reserve(bytes)?;

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(BUCKET_COUNT)
            .map_err(|_| RasterError::OutOfMemory { requested: bytes })?;
        buckets.resize(BUCKET_COUNT, Bucket::default());

        let mut acc = Self { buckets };
        for color in seed {
            acc.add(*color, 1);
        }
        Ok(acc)
    }

    fn cell(color: [u8; 4]) -> usize {
        let shift = 8 - QUANT_BITS;
        let r = (color[0] >> shift) as usize;
        let g = (color[1] >> shift) as usize;
        let b = (color[2] >> shift) as usize;
        (r * QUANT_LEVELS + g) * QUANT_LEVELS + b
    }

    /// Feed `weight` pixels of `color`.
    pub fn add(&mut self, color: [u8; 4], weight: u64) {
        if weight == 0 {
            return;
        }
        let bucket = &mut self.buckets[Self::cell(color)];
        bucket.count += weight;
        for (sum, c) in bucket.sum.iter_mut().zip(color.iter()) {
            *sum += *c as u64 * weight;
        }
    }

    /// Number of non-empty cells.
    pub fn distinct(&self) -> usize {
        self.buckets.iter().filter(|b| b.count > 0).count()
    }

    /// Extract the `max_entries` most populated cells, most popular first.
    pub fn finish(&self, max_entries: usize) -> RepresentativePalette {
        let max_entries = max_entries.clamp(1, MAX_PALETTE_ENTRIES);
        let mut populated: Vec<(usize, &Bucket)> = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.count > 0)
            .collect();
        populated.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));

        let mut palette = RepresentativePalette::default();
        for (_, bucket) in populated.into_iter().take(max_entries) {
            let mut color = [0u8; 4];
            for (c, sum) in color.iter_mut().zip(bucket.sum.iter()) {
                *c = ((*sum + bucket.count / 2) / bucket.count).min(255) as u8;
            }
            palette.colors.push(color);
            palette.counts.push(bucket.count);
        }
        palette
    }
}
