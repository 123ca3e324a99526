//! The tiled raster cache.
//!
//! A [`TiledRasterCache`] presents one resolution of a very large raster as a
//! grid of tiles that are loaded from a [`TileStore`] on demand, kept resident
//! under the budget of a shared [`MemoryPool`], and evicted (saving modified
//! tiles) when the pool needs room.
//!
//! # Locking
//!
//! Two locks are involved and they are always taken in the same order:
//!
//! 1. the pool lock ([`MemoryPool::lock`]), shared by every cache on the pool
//! 2. this cache's tile-map lock, which also guards the [`TileStatusTable`]
//!
//! Loading a tile holds both for the whole load, so two tasks asking for the
//! same index never load it twice and the pool never evicts a tile that is
//! being loaded. Callers must not hold a tile's write guard while calling back
//! into the cache.
//!
//! # Operations
//!
//! - [`get_tile_by_index`](TiledRasterCache::get_tile_by_index): the central
//!   load-or-hit path every other operation builds on
//! - [`clear`](TiledRasterCache::clear): region clears, deferred for tiles that
//!   are not resident
//! - [`compute_histogram`](TiledRasterCache::compute_histogram) and
//!   [`representative_palette`](TiledRasterCache::representative_palette)
//! - [`draw`](TiledRasterCache::draw): compositing onto a [`Canvas`](crate::canvas::Canvas)
//! - [`save_tiles`](TiledRasterCache::save_tiles),
//!   [`save_and_flush_tiles`](TiledRasterCache::save_and_flush_tiles),
//!   [`invalidate_raster`](TiledRasterCache::invalidate_raster)

mod clear;
mod draw;
mod options;
mod stats;

pub use clear::{ClearMode, ClearOptions, ClearReport};
pub use draw::{DrawBranch, DrawOptions, DrawReport};
pub use options::{CacheOptions, TileEventListener, DEFAULT_TEMP_BUFFER_CEILING};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::RasterError;
use crate::geometry::Rect;
use crate::grid::{TileGrid, TileIndex};
use crate::pool::{EvictionPolicy, MemoryPool, OwnerId, PoolEntry, PoolKey};
use crate::stats::{Histogram, HistogramSampling, PaletteParams, RepresentativePalette};
use crate::store::{ResolutionId, TileStore};
use crate::tile::{Tile, TileOwner, TilePoolItem, TileStatusTable, Transaction, ITEM_OVERHEAD_BYTES};

// =============================================================================
// State
// =============================================================================

/// Everything behind the tile-map lock.
struct CacheState {
    tiles: HashMap<TileIndex, Arc<TilePoolItem>>,
    status: TileStatusTable,

    /// Byte size of the first tile ever loaded; `None` until then
    tile_bytes: Option<usize>,

    transaction: Option<Arc<Transaction>>,

    /// Bumped by every cache-level change; cached statistics are only stored
    /// when it did not move during their computation
    generation: u64,

    /// Cached statistics, each tagged with the pixel-edit count it saw
    histogram: Option<(HistogramSampling, Histogram, u64)>,
    palette: Option<(PaletteParams, RepresentativePalette, u64)>,
}

impl CacheState {
    fn content_changed(&mut self) {
        self.generation += 1;
        self.histogram = None;
        self.palette = None;
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    saves: AtomicU64,
    lost: AtomicU64,
    deferred_clears: AtomicU64,
    applied_clears: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub saves: u64,
    pub lost_modifications: u64,
    pub deferred_clears: u64,
    pub applied_clears: u64,
}

// =============================================================================
// TiledRasterCache
// =============================================================================

/// Bounded-memory tile cache over one resolution of a raster.
///
/// Dropping the cache never saves: store I/O is async and `Drop` is not, so
/// modified tiles still resident at that point are reported to listeners as
/// lost, whatever the pool's [`EvictionPolicy`]. Owners that want their edits
/// kept call [`save_and_flush_tiles`](Self::save_and_flush_tiles) first.
pub struct TiledRasterCache<S: TileStore + 'static> {
    store: Arc<S>,
    pool: Arc<MemoryPool>,
    options: CacheOptions,
    grid: TileGrid,
    owner_id: OwnerId,
    this: Weak<Self>,
    state: Mutex<CacheState>,
    counters: Counters,

    /// Pixel edits made to any of this cache's tiles, by any path
    edits: Arc<AtomicU64>,
}

impl<S: TileStore + 'static> TiledRasterCache<S> {
    /// Create a cache reading from `store` and accounting memory in `pool`.
    pub fn new(
        store: Arc<S>,
        pool: Arc<MemoryPool>,
        options: CacheOptions,
    ) -> Result<Arc<Self>, RasterError> {
        options.validate().map_err(RasterError::Config)?;
        if !store.is_compatible() {
            return Err(RasterError::NotSupported(format!(
                "store '{}' cannot back a tiled raster",
                store.identifier()
            )));
        }

        let grid = options.grid();
        let status = if options.track_status {
            TileStatusTable::new(grid.tile_count())
        } else {
            TileStatusTable::disabled()
        };
        let owner_id = pool.register_owner();

        debug!(
            store = store.identifier(),
            resolution = options.resolution,
            width = grid.width,
            height = grid.height,
            tiles = grid.tile_count(),
            owner_id,
            "Created tiled raster cache"
        );

        Ok(Arc::new_cyclic(|this| Self {
            store,
            pool,
            options,
            grid,
            owner_id,
            this: this.clone(),
            state: Mutex::new(CacheState {
                tiles: HashMap::new(),
                status,
                tile_bytes: None,
                transaction: None,
                generation: 0,
                histogram: None,
                palette: None,
            }),
            counters: Counters::default(),
            edits: Arc::new(AtomicU64::new(0)),
        }))
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn resolution(&self) -> ResolutionId {
        self.options.resolution
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    fn owner_ref(&self) -> Weak<dyn TileOwner> {
        self.this.clone()
    }

    fn check_index(&self, index: TileIndex) -> Result<(), RasterError> {
        let tile_count = self.grid.tile_count();
        if index >= tile_count {
            return Err(RasterError::OutOfRange { index, tile_count });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Return the resident tile `index`, loading it if needed.
    ///
    /// With `not_in_pool` the tile is pinned: it is taken out of the pool and
    /// stays resident until [`release_tile`](Self::release_tile). A failed
    /// load leaves the tile map untouched.
    pub async fn get_tile_by_index(
        &self,
        index: TileIndex,
        not_in_pool: bool,
    ) -> Result<Arc<TilePoolItem>, RasterError> {
        self.check_index(index)?;

        let mut pool = self.pool.lock().await;
        let mut state = self.state.lock().await;

        let existing = state.tiles.get(&index).cloned();
        if let Some(item) = &existing {
            if !item.is_invalidated() {
                bump(&self.counters.hits);
                if not_in_pool {
                    item.set_discardable(&mut pool, false);
                } else if item.is_pool_managed() {
                    pool.touch(&item.key());
                }
                return Ok(Arc::clone(item));
            }
        }
        bump(&self.counters.misses);

        // A stale item must not be chosen as a victim while it is reloaded.
        let was_managed = existing.as_ref().is_some_and(|item| item.is_pool_managed());
        if let Some(item) = &existing {
            item.hold_for_reload(&mut pool);
        }

        if let Some(tile_bytes) = state.tile_bytes {
            let victims = pool.need_memory(tile_bytes, ITEM_OVERHEAD_BYTES);
            self.evict_victims(victims, &mut state).await;
        }

        let tile = match self.load_tile(index, &mut state).await {
            Ok(tile) => tile,
            Err(e) => {
                if was_managed {
                    if let Some(item) = &existing {
                        item.notify_pool(&mut pool);
                    }
                }
                return Err(e);
            }
        };

        let item = match existing {
            Some(item) => {
                if item.read().await.is_modified() {
                    self.report_loss(&item);
                }
                item.replace(tile).await;
                debug!(index, resolution = self.options.resolution, "Refreshed stale tile");
                item
            }
            None => {
                let key = PoolKey {
                    owner: self.owner_id,
                    index,
                };
                let item = Arc::new(TilePoolItem::new(key, tile, self.owner_ref()));
                state.tiles.insert(index, Arc::clone(&item));
                item
            }
        };

        if not_in_pool {
            item.set_discardable(&mut pool, false);
        } else if item.is_discardable() {
            item.notify_pool(&mut pool);
        }

        Ok(item)
    }

    /// Load a tile from the store and prepare it for residency.
    async fn load_tile(
        &self,
        index: TileIndex,
        state: &mut CacheState,
    ) -> Result<Tile, RasterError> {
        let resolution = self.options.resolution;
        let loaded = match self.store.load_tile(index, resolution).await {
            Ok(loaded) => loaded,
            Err(source) => {
                bump(&self.counters.load_failures);
                warn!(index, resolution, error = %source, "Tile load failed");
                return Err(RasterError::LoadFailed { index, source });
            }
        };
        bump(&self.counters.loads);

        let mut tile = Tile::new(
            index,
            loaded.image,
            (loaded.pos_x, loaded.pos_y),
            self.options.format,
            self.options.clear_color,
        )
        .with_edit_counter(Arc::clone(&self.edits));
        tile.apply_model(&self.options.model);
        tile.set_modified(false);

        if state.tile_bytes.is_none() {
            let bytes = tile.byte_size();
            state.tile_bytes = Some(bytes);
            debug!(bytes, resolution, "Per-tile byte budget fixed");
        }

        if state.status.clear_flag(index)? {
            tile.clear_all();
            state.status.set_clear_flag(index, false)?;
            bump(&self.counters.applied_clears);
            debug!(index, resolution, "Applied pending clear");
        }

        if self.grid.is_border(index) {
            tile.clip_to(&self.grid.raster_rect());
        }

        if self.options.tile_histograms {
            tile.cache_histogram(self.options.histogram_buckets);
        }

        debug!(index, resolution, bytes = tile.byte_size(), "Loaded tile");
        Ok(tile)
    }

    /// Shorthand for a pool-managed [`get_tile_by_index`](Self::get_tile_by_index).
    pub async fn get_tile(&self, index: TileIndex) -> Result<Arc<TilePoolItem>, RasterError> {
        self.get_tile_by_index(index, false).await
    }

    /// Load and pin a tile.
    pub async fn get_tile_pinned(
        &self,
        index: TileIndex,
    ) -> Result<Arc<TilePoolItem>, RasterError> {
        self.get_tile_by_index(index, true).await
    }

    /// Unpin a tile and hand it back to the pool.
    pub async fn release_tile(&self, item: &TilePoolItem) {
        let mut pool = self.pool.lock().await;
        item.set_discardable(&mut pool, true);
        item.notify_pool(&mut pool);
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    async fn evict_victims(&self, victims: Vec<PoolEntry>, state: &mut CacheState) {
        for victim in victims {
            if victim.key.owner == self.owner_id {
                self.evict_locked(victim.key.index, state, self.pool.policy())
                    .await;
            } else if let Some(owner) = victim.owner.upgrade() {
                owner.evict_pooled(victim.key.index).await;
            }
        }
    }

    /// Remove a tile from the map, then save or report it.
    async fn evict_locked(
        &self,
        index: TileIndex,
        state: &mut CacheState,
        policy: EvictionPolicy,
    ) -> bool {
        let Some(item) = state.tiles.remove(&index) else {
            return false;
        };
        item.retire();
        bump(&self.counters.evictions);

        let tile = item.read().await;
        if tile.is_modified() {
            let saved = match policy {
                EvictionPolicy::SaveDirty => {
                    match self
                        .store
                        .save_tile(index, self.options.resolution, tile.image())
                        .await
                    {
                        Ok(()) => {
                            bump(&self.counters.saves);
                            debug!(index, "Saved modified tile on eviction");
                            true
                        }
                        Err(e) => {
                            warn!(index, error = %e, "Failed to save evicted tile");
                            false
                        }
                    }
                }
                EvictionPolicy::DiscardDirty => false,
            };
            if !saved {
                self.report_loss(&item);
                // The next load brings back the stored pixels.
                state.content_changed();
            }
        }

        debug!(index, resolution = self.options.resolution, "Evicted tile");
        true
    }

    fn report_loss(&self, item: &TilePoolItem) {
        if !item.claim_loss_report() {
            return;
        }
        bump(&self.counters.lost);
        let resolution = self.options.resolution;
        warn!(
            index = item.index(),
            resolution, "Modified tile will not be saved"
        );
        for listener in &self.options.listeners {
            listener.modified_tile_not_saved(resolution, item.index());
        }
    }

    fn notify_content_changed(&self, index: TileIndex) {
        for listener in &self.options.listeners {
            listener.content_changed(self.options.resolution, index);
        }
    }

    /// Evict one discardable tile now. Returns false if it is not resident
    /// or is pinned.
    pub async fn discard_tile(&self, index: TileIndex) -> bool {
        let mut pool = self.pool.lock().await;
        let mut state = self.state.lock().await;
        let Some(item) = state.tiles.get(&index).cloned() else {
            return false;
        };
        if !item.is_discardable() {
            return false;
        }
        pool.remove(&item.key());
        self.evict_locked(index, &mut state, self.pool.policy())
            .await
    }

    // -------------------------------------------------------------------------
    // Residency
    // -------------------------------------------------------------------------

    /// Whether `index` is resident and up to date.
    pub async fn is_resident(&self, index: TileIndex) -> bool {
        let state = self.state.lock().await;
        state
            .tiles
            .get(&index)
            .is_some_and(|item| !item.is_invalidated())
    }

    pub async fn resident_count(&self) -> usize {
        self.state.lock().await.tiles.len()
    }

    /// Resident tile indices in ascending order.
    pub async fn resident_indices(&self) -> Vec<TileIndex> {
        let state = self.state.lock().await;
        let mut indices: Vec<TileIndex> = state.tiles.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Tiles overlapping `rect` that would need a load, row-major.
    pub async fn missing_tiles_in_region(&self, rect: &Rect) -> Vec<TileIndex> {
        let state = self.state.lock().await;
        self.grid
            .tiles_in(rect)
            .filter(|index| {
                state
                    .tiles
                    .get(index)
                    .map_or(true, |item| item.is_invalidated())
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Status flags
    // -------------------------------------------------------------------------

    /// Whether a clear is waiting to be applied when `index` next loads.
    pub async fn pending_clear(&self, index: TileIndex) -> Result<bool, RasterError> {
        self.check_index(index)?;
        self.state.lock().await.status.clear_flag(index)
    }

    /// Mark a tile to be cleared on its next load.
    pub async fn set_pending_clear(&self, index: TileIndex) -> Result<(), RasterError> {
        self.check_index(index)?;
        let mut state = self.state.lock().await;
        state.status.set_clear_flag(index, true)?;
        state.status.set_dirty_for_sub_res_flag(index, true)?;
        state.content_changed();
        Ok(())
    }

    /// Whether lower resolutions derived from `index` are stale.
    pub async fn dirty_for_sub_resolution(&self, index: TileIndex) -> Result<bool, RasterError> {
        self.check_index(index)?;
        self.state.lock().await.status.dirty_for_sub_res_flag(index)
    }

    pub async fn clear_dirty_for_sub_resolution(
        &self,
        index: TileIndex,
    ) -> Result<(), RasterError> {
        self.check_index(index)?;
        self.state
            .lock()
            .await
            .status
            .set_dirty_for_sub_res_flag(index, false)
    }

    /// Deep copy of the status table.
    pub async fn status_snapshot(&self) -> TileStatusTable {
        self.state.lock().await.status.clone()
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Start recording edits. Replaces any active transaction.
    pub async fn begin_transaction(&self) -> Arc<Transaction> {
        let transaction = Arc::new(Transaction::new());
        self.state.lock().await.transaction = Some(Arc::clone(&transaction));
        debug!(id = transaction.id(), "Transaction started");
        transaction
    }

    /// Stop recording and return the finished transaction.
    pub async fn commit_transaction(&self) -> Option<Arc<Transaction>> {
        let transaction = self.state.lock().await.transaction.take();
        if let Some(tx) = &transaction {
            debug!(id = tx.id(), edits = tx.len(), "Transaction committed");
        }
        transaction
    }

    pub async fn active_transaction(&self) -> Option<Arc<Transaction>> {
        self.state.lock().await.transaction.clone()
    }

    // -------------------------------------------------------------------------
    // Save / flush / invalidate
    // -------------------------------------------------------------------------

    /// Save every modified discardable tile and clear its modified flag.
    ///
    /// Modified pinned tiles are left to their holder: listeners are told
    /// they will not be saved here. Returns the number of tiles saved; a
    /// store failure does not stop the pass and the first one is returned.
    pub async fn save_tiles(&self) -> Result<usize, RasterError> {
        let state = self.state.lock().await;
        let mut items: Vec<Arc<TilePoolItem>> = state.tiles.values().cloned().collect();
        items.sort_unstable_by_key(|item| item.index());

        let mut saved = 0;
        let mut first_error = None;
        for item in items {
            let index = item.index();
            if !item.is_discardable() {
                if item.read().await.is_modified() {
                    self.report_loss(&item);
                }
                continue;
            }

            let mut tile = item.write().await;
            if !tile.is_modified() {
                continue;
            }
            match self
                .store
                .save_tile(index, self.options.resolution, tile.image())
                .await
            {
                Ok(()) => {
                    tile.set_modified(false);
                    bump(&self.counters.saves);
                    saved += 1;
                }
                Err(source) => {
                    warn!(index, error = %source, "Failed to save tile");
                    first_error.get_or_insert(RasterError::SaveFailed { index, source });
                }
            }
        }
        drop(state);

        debug!(saved, resolution = self.options.resolution, "Saved tiles");
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Evict every tile, saving modified ones. Pinned tiles at this point are
    /// a defect and fail with [`RasterError::InvariantViolation`] after the
    /// discardable tiles have been flushed.
    pub async fn save_and_flush_tiles(&self) -> Result<usize, RasterError> {
        let mut pool = self.pool.lock().await;
        let mut state = self.state.lock().await;

        let mut indices: Vec<TileIndex> = state.tiles.keys().copied().collect();
        indices.sort_unstable();

        let mut flushed = 0;
        let mut pinned = Vec::new();
        for index in indices {
            let Some(item) = state.tiles.get(&index).cloned() else {
                continue;
            };
            if !item.is_discardable() {
                pinned.push(index);
                continue;
            }
            pool.remove(&item.key());
            if self
                .evict_locked(index, &mut state, EvictionPolicy::SaveDirty)
                .await
            {
                flushed += 1;
            }
        }

        if !pinned.is_empty() {
            error!(
                resolution = self.options.resolution,
                ?pinned,
                "Pinned tiles survived a flush"
            );
            return Err(RasterError::InvariantViolation(format!(
                "{} pinned tile(s) still resident after flush: {:?}",
                pinned.len(),
                pinned
            )));
        }

        debug!(flushed, resolution = self.options.resolution, "Flushed tiles");
        Ok(flushed)
    }

    /// Mark every resident tile stale so it reloads on next access.
    pub async fn invalidate_raster(&self) -> usize {
        let mut state = self.state.lock().await;
        for item in state.tiles.values() {
            item.invalidate();
        }
        state.content_changed();
        let count = state.tiles.len();
        debug!(count, resolution = self.options.resolution, "Invalidated raster");
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let resident = self.state.lock().await.tiles.len();
        let c = &self.counters;
        CacheStats {
            resident,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loads: c.loads.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            saves: c.saves.load(Ordering::Relaxed),
            lost_modifications: c.lost.load(Ordering::Relaxed),
            deferred_clears: c.deferred_clears.load(Ordering::Relaxed),
            applied_clears: c.applied_clears.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<S: TileStore + 'static> TileOwner for TiledRasterCache<S> {
    fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    async fn evict_pooled(&self, index: TileIndex) {
        let mut state = self.state.lock().await;
        let managed = state
            .tiles
            .get(&index)
            .is_some_and(|item| item.is_pool_managed());
        if managed {
            self.evict_locked(index, &mut state, self.pool.policy())
                .await;
        }
    }

    async fn discard_tile(&self, index: TileIndex) -> bool {
        TiledRasterCache::discard_tile(self, index).await
    }
}

/// Retires every tile without saving; see the type docs.
impl<S: TileStore + 'static> Drop for TiledRasterCache<S> {
    fn drop(&mut self) {
        let tiles = std::mem::take(&mut self.state.get_mut().tiles);
        for item in tiles.values() {
            item.retire();
            let modified = item.try_read().is_some_and(|tile| tile.is_modified());
            if modified {
                self.report_loss(item);
            }
        }

        match self.pool.try_lock() {
            Some(mut pool) => {
                pool.remove_owner(self.owner_id);
            }
            None => debug!(
                owner_id = self.owner_id,
                "Pool busy at drop; entries expire with their owner"
            ),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
