//! # Tiled Raster
//!
//! A bounded-memory tile cache for rasters far larger than RAM.
//!
//! A raster is split into a grid of fixed-size tiles. Tiles are loaded on
//! demand from an object store, kept resident while a shared memory pool has
//! room for them, and evicted least-recently-used first, with modified tiles
//! saved back before they go. On top of that the cache composites arbitrary
//! regions onto a canvas, clears shapes (deferring whole-tile clears of
//! non-resident tiles), and aggregates histograms and palettes across tiles.
//!
//! ## Features
//!
//! - **Shared memory budget**: one [`MemoryPool`] serves many caches, e.g. one
//!   per resolution of a pyramid
//! - **Deferred clears**: non-resident tiles fully inside a cleared shape are
//!   flagged instead of loaded
//! - **Strip-buffered drawing**: blended draws go through temporary buffers cut
//!   into strips under a size ceiling, with a direct fallback when allocation
//!   fails
//! - **Incremental statistics**: histograms and palettes built tile by tile and
//!   cached until the raster changes
//!
//! ## Architecture
//!
//! - [`geometry`] / [`grid`] - rectangles, shapes, transforms and tile addressing
//! - [`canvas`] - draw destinations, buffer allocation and the compositing kernel
//! - [`store`] - the object store trait and an in-memory implementation
//! - [`pool`] - the shared LRU memory pool
//! - [`tile`] - resident tiles, pool items and the status table
//! - [`raster`] - the [`TiledRasterCache`] itself
//! - [`stats`] - histogram and palette accumulation
//! - [`export`] - JPEG encoding of rendered canvases
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiled_raster::{
//!     Canvas, CacheOptions, DrawOptions, InMemoryTileStore, MemoryPool, PixelFormat,
//!     TiledRasterCache,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tiled_raster::RasterError> {
//!     let options = CacheOptions::new(8192, 8192, 256, 256);
//!     let store = Arc::new(InMemoryTileStore::new("scratch"));
//!     store.add_resolution(0, options.grid(), [255, 255, 255, 255]);
//!
//!     let cache = TiledRasterCache::new(store, Arc::new(MemoryPool::new()), options)?;
//!     let mut canvas = Canvas::new(1024, 1024, PixelFormat::Rgba8);
//!     cache.draw(&mut canvas, &DrawOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod canvas;
pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod grid;
pub mod pool;
pub mod raster;
pub mod stats;
pub mod store;
pub mod tile;

// Re-export commonly used types
pub use canvas::{allocate_image, BufferAllocator, Canvas, PixelFormat, Resampling, SystemAllocator};
pub use config::{Cli, Command, RasterArgs, RenderConfig, StatsConfig, StatsOutputFormat};
pub use error::{RasterError, StoreError};
pub use export::{encode_jpeg, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};
pub use geometry::{Rect, Region, RleMask, Run, Transform};
pub use grid::{TileGrid, TileIndex};
pub use pool::{EvictionPolicy, MemoryPool, PoolConfig, PoolStats, DEFAULT_POOL_BUDGET};
pub use raster::{
    CacheOptions, CacheStats, ClearMode, ClearOptions, ClearReport, DrawBranch, DrawOptions,
    DrawReport, TileEventListener, TiledRasterCache, DEFAULT_TEMP_BUFFER_CEILING,
};
pub use stats::{
    Histogram, HistogramOptions, HistogramSampling, PaletteParams, RepresentativePalette,
    ScanOutcome,
};
pub use store::{InMemoryTileStore, LoadedTile, ResolutionId, StoreContext, TileStore};
pub use tile::{Membership, Tile, TileOwner, TilePoolItem, TileStatusTable, Transaction};
