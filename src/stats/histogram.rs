use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::Region;

/// Default number of buckets per channel.
pub const DEFAULT_BUCKETS: usize = 256;

/// Number of channels tracked for RGBA data.
pub const RGBA_CHANNELS: usize = 4;

// =============================================================================
// Histogram
// =============================================================================

/// Per-channel, per-bucket pixel counts.
///
/// Counts are never normalised; merging two histograms adds their counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    buckets: usize,
    counts: Vec<Vec<u64>>,
}

impl Histogram {
    /// An empty histogram. Bucket counts of zero or above 256 are clamped.
    pub fn new(channels: usize, buckets: usize) -> Self {
        let buckets = buckets.clamp(1, 256);
        Self {
            buckets,
            counts: vec![vec![0; buckets]; channels],
        }
    }

    pub fn rgba(buckets: usize) -> Self {
        Self::new(RGBA_CHANNELS, buckets)
    }

    pub fn channels(&self) -> usize {
        self.counts.len()
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Bucket that an 8-bit sample falls into.
    pub fn bucket_of(&self, value: u8) -> usize {
        value as usize * self.buckets / 256
    }

    /// Record one pixel.
    pub fn record(&mut self, pixel: [u8; 4]) {
        for (channel, value) in pixel.iter().enumerate().take(self.counts.len()) {
            let bucket = self.bucket_of(*value);
            self.counts[channel][bucket] += 1;
        }
    }

    pub fn count(&self, channel: usize, bucket: usize) -> u64 {
        self.counts
            .get(channel)
            .and_then(|c| c.get(bucket))
            .copied()
            .unwrap_or(0)
    }

    pub fn channel(&self, channel: usize) -> &[u64] {
        self.counts.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total samples recorded on a channel.
    pub fn total(&self, channel: usize) -> u64 {
        self.channel(channel).iter().sum()
    }

    /// Add `other`'s counts bucket by bucket.
    ///
    /// Channels or buckets that do not exist in `self` are ignored.
    pub fn add(&mut self, other: &Histogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            if self.buckets == other.buckets {
                for (a, b) in mine.iter_mut().zip(theirs.iter()) {
                    *a += *b;
                }
            } else {
                // Re-bucket through the 8-bit value range.
                for (bucket, count) in theirs.iter().enumerate() {
                    let value = bucket * 256 / other.buckets;
                    let target = value * self.buckets / 256;
                    mine[target] += *count;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        for channel in &mut self.counts {
            channel.iter_mut().for_each(|c| *c = 0);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|c| c.iter().all(|v| *v == 0))
    }
}

// =============================================================================
// Sampling parameters
// =============================================================================

/// Tile sampling stride for a scan percentage: `100 / pct`, never below one.
///
/// Integer division means percentages that do not divide 100 round the stride
/// down, so e.g. 30% samples every third tile (about 33%).
pub fn scan_stride(tiles_to_scan_percentage: u8) -> u64 {
    let pct = tiles_to_scan_percentage.clamp(1, 100) as u64;
    (100 / pct).max(1)
}

/// What to sample when building a histogram. Two requests with equal
/// sampling produce equal results, which is what the histogram cache keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSampling {
    /// Restrict to this region of the raster; `None` scans whole tiles
    pub region: Option<Region>,

    /// Percentage of tiles to scan when no region is given (1-100)
    pub tiles_to_scan_percentage: u8,

    /// Sample every n-th pixel in each direction within a tile
    pub pixel_stride: u32,

    /// Buckets per channel
    pub buckets: usize,
}

impl Default for HistogramSampling {
    fn default() -> Self {
        Self {
            region: None,
            tiles_to_scan_percentage: 100,
            pixel_stride: 1,
            buckets: DEFAULT_BUCKETS,
        }
    }
}

impl HistogramSampling {
    /// Full sampling of a region.
    pub fn region(region: Region) -> Self {
        Self {
            region: Some(region),
            ..Self::default()
        }
    }

    /// Whole-tile sampling at full resolution, as computed on tile load.
    pub fn is_full(&self) -> bool {
        self.region.is_none() && self.pixel_stride <= 1
    }
}

/// Options for a cache-wide histogram request.
#[derive(Debug, Clone, Default)]
pub struct HistogramOptions {
    pub sampling: HistogramSampling,

    /// Cleared by the caller to stop a long scan early
    pub keep_going: Option<Arc<AtomicBool>>,
}

impl HistogramOptions {
    pub fn new(sampling: HistogramSampling) -> Self {
        Self {
            sampling,
            keep_going: None,
        }
    }

    pub fn with_keep_going(mut self, flag: Arc<AtomicBool>) -> Self {
        self.keep_going = Some(flag);
        self
    }

    pub(crate) fn should_continue(&self) -> bool {
        self.keep_going
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(true)
    }
}

/// How a histogram scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// Served from the cached histogram
    Cached,
    /// Every selected tile was scanned
    Completed { tiles_scanned: u64 },
    /// The keep-going flag was cleared before the scan finished
    Cancelled { tiles_scanned: u64 },
}
