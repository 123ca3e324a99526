use std::fmt;
use std::sync::Arc;

use image::Rgba;

use crate::canvas::{BufferAllocator, PixelFormat, SystemAllocator};
use crate::geometry::{Region, Transform};
use crate::grid::{TileGrid, TileIndex};
use crate::stats::DEFAULT_BUCKETS;
use crate::store::ResolutionId;

/// Default ceiling for Branch C temporary buffers: 64MB
pub const DEFAULT_TEMP_BUFFER_CEILING: usize = 64 * 1024 * 1024;

/// Notifications for layers built on top of a cache, such as a pyramid that
/// keeps one cache per resolution.
pub trait TileEventListener: Send + Sync {
    /// A modified tile is leaving memory without being saved.
    ///
    /// Fired at most once per resident tile.
    fn modified_tile_not_saved(&self, resolution: ResolutionId, index: TileIndex);

    /// Pixels of a tile changed, so data derived from it is stale.
    fn content_changed(&self, _resolution: ResolutionId, _index: TileIndex) {}
}

/// Construction options for a [`TiledRasterCache`](super::TiledRasterCache).
#[derive(Clone)]
pub struct CacheOptions {
    /// Raster width in pixels
    pub width: u64,

    /// Raster height in pixels
    pub height: u64,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Resolution this cache serves from the store
    pub resolution: ResolutionId,

    pub format: PixelFormat,

    /// Colour written by clears
    pub clear_color: Rgba<u8>,

    /// Raster → model transform
    pub model: Transform,

    /// The raster's own clip shape, in raster coordinates
    pub clip: Option<Region>,

    /// Keep the out-of-band pending-clear / dirty flags
    pub track_status: bool,

    /// Compute a full histogram for every tile as it is loaded
    pub tile_histograms: bool,

    pub histogram_buckets: usize,

    /// Largest temporary buffer a draw may allocate in one piece
    pub temp_buffer_ceiling: usize,

    pub listeners: Vec<Arc<dyn TileEventListener>>,

    /// Gatekeeper for temporary buffers and palette accumulators
    pub allocator: Arc<dyn BufferAllocator>,
}

impl CacheOptions {
    pub fn new(width: u64, height: u64, tile_width: u32, tile_height: u32) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            resolution: 0,
            format: PixelFormat::Rgba8,
            clear_color: Rgba([0, 0, 0, 0]),
            model: Transform::identity(),
            clip: None,
            track_status: true,
            tile_histograms: false,
            histogram_buckets: DEFAULT_BUCKETS,
            temp_buffer_ceiling: DEFAULT_TEMP_BUFFER_CEILING,
            listeners: Vec::new(),
            allocator: Arc::new(SystemAllocator),
        }
    }

    pub fn with_resolution(mut self, resolution: ResolutionId) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_clear_color(mut self, color: [u8; 4]) -> Self {
        self.clear_color = Rgba(color);
        self
    }

    pub fn with_model(mut self, model: Transform) -> Self {
        self.model = model;
        self
    }

    pub fn with_clip(mut self, clip: Region) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_status_tracking(mut self, enabled: bool) -> Self {
        self.track_status = enabled;
        self
    }

    pub fn with_tile_histograms(mut self, enabled: bool) -> Self {
        self.tile_histograms = enabled;
        self
    }

    pub fn with_histogram_buckets(mut self, buckets: usize) -> Self {
        self.histogram_buckets = buckets;
        self
    }

    pub fn with_temp_buffer_ceiling(mut self, bytes: usize) -> Self {
        self.temp_buffer_ceiling = bytes;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn TileEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn grid(&self) -> TileGrid {
        TileGrid::new(self.width, self.height, self.tile_width, self.tile_height)
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "raster must not be empty (got {}x{})",
                self.width, self.height
            ));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err("tile dimensions must be positive".to_string());
        }
        if !self.model.is_valid() {
            return Err(format!("model transform is not invertible: {:?}", self.model));
        }
        if self.histogram_buckets == 0 || self.histogram_buckets > 256 {
            return Err(format!(
                "histogram buckets must be between 1 and 256 (got {})",
                self.histogram_buckets
            ));
        }
        if self.temp_buffer_ceiling == 0 {
            return Err("temporary buffer ceiling must be positive".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("tile_width", &self.tile_width)
            .field("tile_height", &self.tile_height)
            .field("resolution", &self.resolution)
            .field("format", &self.format)
            .field("track_status", &self.track_status)
            .field("tile_histograms", &self.tile_histograms)
            .field("temp_buffer_ceiling", &self.temp_buffer_ceiling)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
