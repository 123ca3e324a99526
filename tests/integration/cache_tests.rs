//! Tile loading, pooling and eviction integration tests.
//!
//! Tests verify:
//! - Concurrent requests for one tile cause a single store load
//! - Failed loads leave the tile map untouched
//! - Evicted modified tiles round-trip through the store
//! - Caches sharing a pool evict each other's tiles in LRU order
//! - Invalidation, save and flush semantics

use std::sync::Arc;
use std::time::Duration;

use tiled_raster::{
    CacheOptions, EvictionPolicy, MemoryPool, PoolConfig, RasterError, TiledRasterCache,
};

use super::test_utils::{
    cache_with, flat_store, gradient_pixel, gradient_store, pool_for_tiles, RecordingListener,
    TrackingStore,
};

const TILE: u32 = 32;
const TILE_BYTES: usize = (TILE * TILE * 4) as usize;

fn options() -> CacheOptions {
    // 4x4 tiles of 32px.
    CacheOptions::new(128, 128, TILE, TILE)
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_load_once() {
    let options = options();
    let store = Arc::new(
        TrackingStore::new(gradient_store(&options)).with_delay(Duration::from_millis(20)),
    );
    let cache = cache_with(Arc::clone(&store), options);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.get_tile(5).await.unwrap() }));
    }

    let mut items = Vec::new();
    for handle in handles {
        items.push(handle.await.unwrap());
    }

    assert_eq!(store.loads_of(5), 1);
    assert!(items.iter().all(|item| Arc::ptr_eq(item, &items[0])));
    assert_eq!(cache.resident_count().await, 1);
}

#[tokio::test]
async fn test_loaded_tile_pixels_match_store() {
    let options = options();
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    let item = cache.get_tile(6).await.unwrap();
    let tile = item.read().await;
    assert_eq!(tile.origin(), (64, 32));
    assert_eq!(tile.pixel(70, 40), Some(gradient_pixel(70, 40)));
    assert_eq!(tile.pixel(10, 10), None);
}

#[tokio::test]
async fn test_failed_load_leaves_map_untouched() {
    let options = options();
    let store = Arc::new(TrackingStore::new(gradient_store(&options)));
    let cache = cache_with(Arc::clone(&store), options);

    cache.get_tile(0).await.unwrap();
    store.fail_tile(2);

    let result = cache.get_tile(2).await;
    assert!(matches!(result, Err(RasterError::LoadFailed { index: 2, .. })));
    assert_eq!(cache.resident_indices().await, vec![0]);
    assert!(!cache.is_resident(2).await);

    store.heal_tile(2);
    cache.get_tile(2).await.unwrap();
    assert_eq!(cache.resident_indices().await, vec![0, 2]);

    let stats = cache.stats().await;
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.loads, 2);
}

#[tokio::test]
async fn test_missing_tiles_in_region() {
    let options = options();
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    cache.get_tile(5).await.unwrap();
    let missing = cache
        .missing_tiles_in_region(&tiled_raster::Rect::new(40, 40, 40, 40))
        .await;
    assert_eq!(missing, vec![6, 9, 10]);
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_pool_budget_bounds_residency() {
    let options = options();
    let pool = pool_for_tiles(4, TILE_BYTES);
    let budget = pool.lock().await.budget();
    let cache = TiledRasterCache::new(Arc::new(gradient_store(&options)), pool, options).unwrap();

    for index in 0..16 {
        cache.get_tile(index).await.unwrap();
        assert!(cache.pool().used_bytes().await <= budget);
    }
    assert!(cache.resident_count().await <= 4);
    // The most recent tiles survive.
    assert!(cache.is_resident(15).await);
    assert!(!cache.is_resident(0).await);
}

#[tokio::test]
async fn test_discard_and_reload_round_trip() {
    let options = options().with_clear_color([9, 9, 9, 255]);
    let store = Arc::new(gradient_store(&options));
    let cache = cache_with(Arc::clone(&store), options);

    let item = cache.get_tile(1).await.unwrap();
    item.write().await.clear_all();
    drop(item);

    assert!(cache.discard_tile(1).await);
    assert!(!cache.is_resident(1).await);
    assert_eq!(store.save_count(), 1);

    let reloaded = cache.get_tile(1).await.unwrap();
    let tile = reloaded.read().await;
    assert_eq!(tile.pixel(40, 5).map(|p| p.0), Some([9, 9, 9, 255]));
    assert!(!tile.is_modified());
}

#[tokio::test]
async fn test_shared_pool_evicts_across_caches() {
    let opts_a = options();
    let opts_b = options().with_resolution(1);
    let store = Arc::new(gradient_store(&opts_a));
    store.add_resolution(1, opts_b.grid(), [1, 2, 3, 255]);

    let pool = pool_for_tiles(2, TILE_BYTES);
    let cache_a = TiledRasterCache::new(Arc::clone(&store), Arc::clone(&pool), opts_a).unwrap();
    let cache_b = TiledRasterCache::new(Arc::clone(&store), Arc::clone(&pool), opts_b).unwrap();
    assert_ne!(cache_a.owner_id(), cache_b.owner_id());

    // B's tile is modified so its eviction has to save it.
    let b0 = cache_b.get_tile(0).await.unwrap();
    b0.write().await.clear_all();
    drop(b0);

    cache_a.get_tile(0).await.unwrap();
    cache_a.get_tile(1).await.unwrap();

    assert!(!cache_b.is_resident(0).await);
    assert!(store.contains(1, 0));
    assert!(cache_a.is_resident(0).await);
    assert!(cache_a.is_resident(1).await);
    assert_eq!(cache_b.stats().await.evictions, 1);
}

#[tokio::test]
async fn test_dropping_a_cache_frees_shared_pool() {
    let options = options();
    let store = Arc::new(gradient_store(&options));
    let pool = Arc::new(MemoryPool::new());
    let cache_a =
        TiledRasterCache::new(Arc::clone(&store), Arc::clone(&pool), options.clone()).unwrap();
    let cache_b = TiledRasterCache::new(Arc::clone(&store), Arc::clone(&pool), options).unwrap();

    cache_a.get_tile(0).await.unwrap();
    cache_b.get_tile(0).await.unwrap();
    assert_eq!(pool.lock().await.len(), 2);

    drop(cache_a);
    assert_eq!(pool.lock().await.len(), 1);
    assert!(cache_b.is_resident(0).await);
}

#[tokio::test]
async fn test_dropping_modified_tiles_reports_loss() {
    let options = options();
    let listener = Arc::new(RecordingListener::default());
    let store = Arc::new(gradient_store(&options));
    let cache = cache_with(store, options.with_listener(listener.clone()));

    let item = cache.get_tile(3).await.unwrap();
    item.write().await.clear_all();
    drop(item);
    drop(cache);

    assert_eq!(listener.lost(), vec![(0, 3)]);
}

#[tokio::test]
async fn test_flush_before_drop_keeps_edits() {
    let options = options();
    let listener = Arc::new(RecordingListener::default());
    let store = Arc::new(gradient_store(&options));
    let cache = cache_with(Arc::clone(&store), options.with_listener(listener.clone()));

    let item = cache.get_tile(3).await.unwrap();
    item.write().await.clear_all();
    drop(item);
    assert_eq!(cache.save_and_flush_tiles().await.unwrap(), 1);
    drop(cache);

    assert!(listener.lost().is_empty());
    assert_eq!(store.save_count(), 1);
}

// =============================================================================
// Invalidate / Save / Flush
// =============================================================================

#[tokio::test]
async fn test_invalidate_forces_reload() {
    let options = options();
    let store = Arc::new(TrackingStore::new(gradient_store(&options)));
    let cache = cache_with(Arc::clone(&store), options);

    let before = cache.get_tile(4).await.unwrap();
    assert_eq!(cache.invalidate_raster().await, 1);
    assert!(!cache.is_resident(4).await);

    let after = cache.get_tile(4).await.unwrap();
    assert_eq!(store.loads_of(4), 2);
    // The item is refreshed in place.
    assert!(Arc::ptr_eq(&before, &after));
    assert!(!after.is_invalidated());
}

#[tokio::test]
async fn test_stale_modified_tile_reports_loss_on_reload() {
    let options = options();
    let listener = Arc::new(RecordingListener::default());
    let store = Arc::new(gradient_store(&options));
    let cache = cache_with(store, options.with_listener(listener.clone()));

    let item = cache.get_tile(2).await.unwrap();
    item.write().await.clear_all();
    cache.invalidate_raster().await;
    cache.get_tile(2).await.unwrap();

    assert_eq!(listener.lost(), vec![(0, 2)]);
    assert!(!item.read().await.is_modified());
}

#[tokio::test]
async fn test_failed_stale_reload_keeps_item() {
    let options = options();
    let store = Arc::new(TrackingStore::new(gradient_store(&options)));
    let cache = cache_with(Arc::clone(&store), options);

    let item = cache.get_tile(7).await.unwrap();
    cache.invalidate_raster().await;
    store.fail_tile(7);
    assert!(cache.get_tile(7).await.is_err());
    assert_eq!(cache.resident_count().await, 1);
    assert!(item.is_pool_managed());

    store.heal_tile(7);
    let again = cache.get_tile(7).await.unwrap();
    assert!(Arc::ptr_eq(&item, &again));
}

#[tokio::test]
async fn test_save_tiles_skips_pinned() {
    let options = options();
    let listener = Arc::new(RecordingListener::default());
    let store = Arc::new(flat_store(&options, [5, 5, 5, 255]));
    let cache = cache_with(Arc::clone(&store), options.with_listener(listener.clone()));

    let pooled = cache.get_tile(0).await.unwrap();
    pooled.write().await.clear_all();
    let pinned = cache.get_tile_pinned(1).await.unwrap();
    pinned.write().await.clear_all();

    assert_eq!(cache.save_tiles().await.unwrap(), 1);
    assert!(store.contains(0, 0));
    assert!(!store.contains(0, 1));
    assert!(!pooled.read().await.is_modified());
    assert!(pinned.read().await.is_modified());
    assert_eq!(listener.lost(), vec![(0, 1)]);

    // Reported once even if saved again.
    cache.save_tiles().await.unwrap();
    assert_eq!(listener.lost().len(), 1);
}

#[tokio::test]
async fn test_flush_with_pinned_tile_is_invariant_violation() {
    let options = options();
    let cache = cache_with(Arc::new(flat_store(&options, [0, 0, 0, 255])), options);

    cache.get_tile(0).await.unwrap();
    cache.get_tile(1).await.unwrap();
    let pinned = cache.get_tile_pinned(2).await.unwrap();

    let result = cache.save_and_flush_tiles().await;
    assert!(matches!(result, Err(RasterError::InvariantViolation(_))));
    assert_eq!(cache.resident_indices().await, vec![2]);

    cache.release_tile(&pinned).await;
    assert_eq!(cache.save_and_flush_tiles().await.unwrap(), 1);
    assert_eq!(cache.resident_count().await, 0);
}

#[tokio::test]
async fn test_flush_saves_even_under_discard_policy() {
    let options = options();
    let store = Arc::new(flat_store(&options, [0, 0, 0, 255]));
    let pool = Arc::new(MemoryPool::with_config(
        PoolConfig::default().with_policy(EvictionPolicy::DiscardDirty),
    ));
    let cache = TiledRasterCache::new(Arc::clone(&store), pool, options).unwrap();

    let item = cache.get_tile(3).await.unwrap();
    item.write().await.clear_all();
    drop(item);

    assert_eq!(cache.save_and_flush_tiles().await.unwrap(), 1);
    assert_eq!(store.save_count(), 1);
}
