//! Cross-tile statistics.
//!
//! - [`Histogram`]: per-channel bucket counts that merge by addition, so a
//!   histogram built tile by tile equals one built over the monolithic raster
//! - [`PaletteAccumulator`]: popularity quantizer used to derive a
//!   [`RepresentativePalette`] from many tiles

mod histogram;
mod palette;

pub use histogram::{
    scan_stride, Histogram, HistogramOptions, HistogramSampling, ScanOutcome, DEFAULT_BUCKETS,
    RGBA_CHANNELS,
};
pub use palette::{PaletteAccumulator, PaletteParams, RepresentativePalette, MAX_PALETTE_ENTRIES};
