//! Test utilities for integration tests.
//!
//! Mock stores with request tracking and failure injection, a refusing
//! allocator, and helpers for building caches over synthetic rasters.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tiled_raster::{
    BufferAllocator, CacheOptions, InMemoryTileStore, LoadedTile, MemoryPool, PoolConfig,
    RasterError, ResolutionId, StoreContext, StoreError, TileEventListener, TileIndex,
    TileStore, TiledRasterCache,
};

// =============================================================================
// Tracking Store
// =============================================================================

/// A store wrapping [`InMemoryTileStore`] that records loads per tile, can
/// fail chosen tiles and can delay every load.
pub struct TrackingStore {
    inner: InMemoryTileStore,
    loads: Mutex<Vec<TileIndex>>,
    failing: Mutex<HashSet<TileIndex>>,
    delay: Option<Duration>,
}

impl TrackingStore {
    pub fn new(inner: InMemoryTileStore) -> Self {
        Self {
            inner,
            loads: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            delay: None,
        }
    }

    /// Sleep before every load so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_tile(&self, index: TileIndex) {
        self.failing.lock().unwrap().insert(index);
    }

    pub fn heal_tile(&self, index: TileIndex) {
        self.failing.lock().unwrap().remove(&index);
    }

    /// Number of successful and failed load attempts for `index`.
    pub fn loads_of(&self, index: TileIndex) -> usize {
        self.loads.lock().unwrap().iter().filter(|i| **i == index).count()
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    pub fn inner(&self) -> &InMemoryTileStore {
        &self.inner
    }
}

#[async_trait]
impl TileStore for TrackingStore {
    async fn load_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
    ) -> Result<LoadedTile, StoreError> {
        self.loads.lock().unwrap().push(index);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&index) {
            return Err(StoreError::Io(format!("injected failure for tile {}", index)));
        }
        self.inner.load_tile(index, resolution).await
    }

    async fn save_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
        image: &RgbaImage,
    ) -> Result<(), StoreError> {
        self.inner.save_tile(index, resolution, image).await
    }

    fn context(&self) -> StoreContext {
        self.inner.context()
    }

    fn set_context(&self, context: StoreContext) {
        self.inner.set_context(context)
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Allocators and Listeners
// =============================================================================

/// Allocator that refuses any request above `limit` bytes.
pub struct LimitedAllocator {
    pub limit: usize,
    pub refusals: AtomicUsize,
}

impl LimitedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            refusals: AtomicUsize::new(0),
        }
    }

    pub fn refusals(&self) -> usize {
        self.refusals.load(Ordering::SeqCst)
    }
}

impl BufferAllocator for LimitedAllocator {
    fn reserve(&self, bytes: usize) -> Result<(), RasterError> {
        if bytes > self.limit {
            self.refusals.fetch_add(1, Ordering::SeqCst);
            return Err(RasterError::OutOfMemory { requested: bytes });
        }
        Ok(())
    }
}

/// Allocator that grants the first `successes` requests and refuses the rest.
pub struct CountdownAllocator {
    remaining: AtomicUsize,
}

impl CountdownAllocator {
    pub fn new(successes: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(successes),
        }
    }
}

impl BufferAllocator for CountdownAllocator {
    fn reserve(&self, bytes: usize) -> Result<(), RasterError> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| RasterError::OutOfMemory { requested: bytes })
    }
}

/// Listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    pub lost: Mutex<Vec<(ResolutionId, TileIndex)>>,
    pub changed: Mutex<Vec<(ResolutionId, TileIndex)>>,
}

impl RecordingListener {
    pub fn lost(&self) -> Vec<(ResolutionId, TileIndex)> {
        self.lost.lock().unwrap().clone()
    }

    pub fn changed(&self) -> Vec<(ResolutionId, TileIndex)> {
        self.changed.lock().unwrap().clone()
    }
}

impl TileEventListener for RecordingListener {
    fn modified_tile_not_saved(&self, resolution: ResolutionId, index: TileIndex) {
        self.lost.lock().unwrap().push((resolution, index));
    }

    fn content_changed(&self, resolution: ResolutionId, index: TileIndex) {
        self.changed.lock().unwrap().push((resolution, index));
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Pixel colour of the gradient raster at `(x, y)`.
pub fn gradient_pixel(x: i64, y: i64) -> Rgba<u8> {
    Rgba([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8, 255])
}

/// In-memory store with one gradient resolution matching `options`.
pub fn gradient_store(options: &CacheOptions) -> InMemoryTileStore {
    let store = InMemoryTileStore::new("gradient");
    store.add_resolution_with(
        options.resolution,
        options.grid(),
        Arc::new(|x: i64, y: i64| gradient_pixel(x, y)),
    );
    store
}

/// In-memory store with one flat resolution matching `options`.
pub fn flat_store(options: &CacheOptions, color: [u8; 4]) -> InMemoryTileStore {
    let store = InMemoryTileStore::new("flat");
    store.add_resolution(options.resolution, options.grid(), color);
    store
}

/// Pool with room for exactly `tiles` tiles of `tile_bytes` each.
pub fn pool_for_tiles(tiles: usize, tile_bytes: usize) -> Arc<MemoryPool> {
    let per_tile = tile_bytes + tiled_raster::tile::ITEM_OVERHEAD_BYTES;
    Arc::new(MemoryPool::with_config(PoolConfig::with_budget(per_tile * tiles)))
}

/// Cache over `store` with an unbounded-in-practice pool.
pub fn cache_with<S: TileStore + 'static>(
    store: Arc<S>,
    options: CacheOptions,
) -> Arc<TiledRasterCache<S>> {
    TiledRasterCache::new(store, Arc::new(MemoryPool::new()), options).unwrap()
}
