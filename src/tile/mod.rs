//! Resident tiles and their bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            TiledRasterCache             │
//! │   TileMap: index → Arc<TilePoolItem>    │
//! │   TileStatusTable (out-of-band flags)   │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TilePoolItem               │
//! │  membership, cached size, invalidated   │
//! │  ┌───────────────────────────────────┐  │
//! │  │     RwLock<Tile> (pixel data)     │  │
//! │  └───────────────────────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Tile`]: one tile's pixels, position, transform and modification state
//! - [`TilePoolItem`]: pool-managed wrapper owning a `Tile`'s lifecycle
//! - [`TileStatusTable`]: packed pending-clear / dirty-for-sub-resolution bits
//! - [`Transaction`]: edit log swapped into tiles while they are edited

mod item;
mod status;
mod transaction;

pub use item::{Membership, TileOwner, TilePoolItem, ITEM_OVERHEAD_BYTES};
pub use status::TileStatusTable;
pub use transaction::{EditKind, EditRecord, Transaction};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::canvas::{BufferAllocator, PixelFormat};
use crate::error::RasterError;
use crate::geometry::{Rect, Region, RleMask, Transform};
use crate::grid::TileIndex;
use crate::stats::{Histogram, HistogramSampling, PaletteAccumulator, RepresentativePalette};

// =============================================================================
// Tile
// =============================================================================

/// One resident tile.
///
/// Geometry comes in two frames: tile-local pixel coordinates (the image's
/// own) and raster coordinates, offset by the tile's origin.
#[derive(Debug, Clone)]
pub struct Tile {
    index: TileIndex,
    image: RgbaImage,
    origin: (i64, i64),
    extent: Rect,
    transform: Transform,
    format: PixelFormat,
    clear_color: Rgba<u8>,
    modified: bool,
    histogram: Option<Histogram>,
    transaction: Option<Arc<Transaction>>,

    /// Shared with the owning cache; bumped on every pixel edit
    edits: Option<Arc<AtomicU64>>,
}

impl Tile {
    /// Wrap a freshly loaded image whose top-left pixel sits at `origin`.
    pub fn new(
        index: TileIndex,
        image: RgbaImage,
        origin: (i64, i64),
        format: PixelFormat,
        clear_color: Rgba<u8>,
    ) -> Self {
        let extent = Rect::new(0, 0, image.width() as u64, image.height() as u64);
        let mut clear_color = clear_color;
        if !format.has_alpha() {
            clear_color.0[3] = 255;
        }
        Self {
            index,
            image,
            origin,
            extent,
            transform: Transform::translation(origin.0 as f64, origin.1 as f64),
            format,
            clear_color,
            modified: false,
            histogram: None,
            transaction: None,
            edits: None,
        }
    }

    /// Count every later pixel edit in `edits`.
    pub fn with_edit_counter(mut self, edits: Arc<AtomicU64>) -> Self {
        self.edits = Some(edits);
        self
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Logical extent in tile-local coordinates.
    pub fn extent(&self) -> Rect {
        self.extent
    }

    /// Logical extent in raster coordinates.
    pub fn raster_extent(&self) -> Rect {
        self.extent.translate(self.origin.0, self.origin.1)
    }

    /// Tile-local → model transform.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Compose the raster's model transform with this tile's translation.
    pub fn apply_model(&mut self, model: &Transform) {
        let local = Transform::translation(self.origin.0 as f64, self.origin.1 as f64);
        self.transform = model.then(&local);
    }

    /// Restrict the logical extent to the raster's true bounds.
    pub fn clip_to(&mut self, raster: &Rect) {
        let clipped = raster
            .translate(-self.origin.0, -self.origin.1)
            .intersect(&self.extent)
            .unwrap_or(Rect::new(0, 0, 0, 0));
        self.extent = clipped;
        self.histogram = None;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Bytes of pixel data held by this tile.
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len()
    }

    /// Pixel at raster coordinates, if inside the logical extent.
    pub fn pixel(&self, x: i64, y: i64) -> Option<Rgba<u8>> {
        if !self.raster_extent().contains(x, y) {
            return None;
        }
        let lx = (x - self.origin.0) as u32;
        let ly = (y - self.origin.1) as u32;
        Some(*self.image.get_pixel(lx, ly))
    }

    /// Install a transaction, returning the previous one.
    pub fn swap_transaction(
        &mut self,
        transaction: Option<Arc<Transaction>>,
    ) -> Option<Arc<Transaction>> {
        std::mem::replace(&mut self.transaction, transaction)
    }

    // -------------------------------------------------------------------------
    // Clearing
    // -------------------------------------------------------------------------

    fn fill_local(&mut self, rect: &Rect) {
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                self.image.put_pixel(x as u32, y as u32, self.clear_color);
            }
        }
    }

    fn mark_edited(&mut self, bounds: Rect, kind: EditKind) {
        self.modified = true;
        self.histogram = None;
        if let Some(edits) = &self.edits {
            edits.fetch_add(1, Ordering::AcqRel);
        }
        if let Some(tx) = &self.transaction {
            tx.record(EditRecord {
                index: self.index,
                bounds,
                kind,
            });
        }
    }

    /// Clear every pixel of the image.
    pub fn clear_all(&mut self) {
        let full = Rect::new(0, 0, self.image.width() as u64, self.image.height() as u64);
        self.fill_local(&full);
        let bounds = self.raster_extent();
        self.mark_edited(bounds, EditKind::ClearAll);
    }

    /// Clear the pixels of `region` (raster coordinates). Returns whether anything changed.
    pub fn clear_region(&mut self, region: &Region) -> bool {
        let extent = self.raster_extent();
        let clipped = region.intersect_rect(&extent);
        let Some(bounds) = clipped.bounds() else {
            return false;
        };
        for rect in clipped.rects() {
            let local = rect.translate(-self.origin.0, -self.origin.1);
            self.fill_local(&local);
        }
        self.mark_edited(bounds, EditKind::ClearShape);
        true
    }

    /// Clear the pixels under `mask` (raster coordinates). Returns whether anything changed.
    pub fn clear_runs(&mut self, mask: &RleMask) -> bool {
        let extent = self.raster_extent();
        let spans = mask.runs_in(&extent);
        if spans.is_empty() {
            return false;
        }
        let mut bounds: Option<Rect> = None;
        for (y, x0, x1) in spans {
            let span = Rect::from_corners(x0, y, x1, y + 1);
            self.fill_local(&span.translate(-self.origin.0, -self.origin.1));
            bounds = Some(bounds.map_or(span, |b| b.union_bounds(&span)));
        }
        if let Some(bounds) = bounds {
            self.mark_edited(bounds, EditKind::ClearRuns);
        }
        true
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Compute and keep the full-sampling histogram.
    pub fn cache_histogram(&mut self, buckets: usize) {
        let sampling = HistogramSampling {
            buckets,
            ..HistogramSampling::default()
        };
        self.histogram = Some(self.scan_histogram(&sampling));
    }

    pub fn cached_histogram(&self) -> Option<&Histogram> {
        self.histogram.as_ref()
    }

    /// Histogram of this tile under `sampling`. Regions are in raster coordinates.
    pub fn histogram(&self, sampling: &HistogramSampling) -> Histogram {
        if sampling.is_full() {
            if let Some(cached) = &self.histogram {
                if cached.buckets() == sampling.buckets.clamp(1, 256) {
                    return cached.clone();
                }
            }
        }
        self.scan_histogram(sampling)
    }

    fn scan_histogram(&self, sampling: &HistogramSampling) -> Histogram {
        let mut histogram = Histogram::rgba(sampling.buckets);
        let stride = sampling.pixel_stride.max(1) as usize;
        let extent = self.raster_extent();

        let area = match &sampling.region {
            Some(region) => match region.intersect_rect(&extent).bounds() {
                Some(b) => b,
                None => return histogram,
            },
            None => extent,
        };

        for y in (area.y0..area.y1).step_by(stride) {
            for x in (area.x0..area.x1).step_by(stride) {
                if let Some(region) = &sampling.region {
                    if !region.contains(x, y) {
                        continue;
                    }
                }
                let lx = (x - self.origin.0) as u32;
                let ly = (y - self.origin.1) as u32;
                histogram.record(self.image.get_pixel(lx, ly).0);
            }
        }
        histogram
    }

    /// Popularity palette of the tile's logical extent.
    pub fn representative_palette(
        &self,
        max_entries: usize,
        allocator: &dyn BufferAllocator,
    ) -> Result<RepresentativePalette, RasterError> {
        let mut acc = PaletteAccumulator::try_new(allocator, &[])?;
        for y in self.extent.y0..self.extent.y1 {
            for x in self.extent.x0..self.extent.x1 {
                acc.add(self.image.get_pixel(x as u32, y as u32).0, 1);
            }
        }
        Ok(acc.finish(max_entries))
    }
}

// =============================================================================
// Tests
// =============================================================================
