//! Clear integration tests.
//!
//! Tests verify:
//! - Resident tiles are cleared in place
//! - Non-resident tiles fully inside the shape are deferred, not loaded
//! - Deferred clears are applied exactly once on the next load
//! - Clears racing a load still reach the tile

use std::sync::Arc;
use std::time::Duration;

use image::Rgba;
use tiled_raster::{CacheOptions, ClearOptions, RasterError, Rect};

use super::test_utils::{cache_with, flat_store, RecordingListener, TrackingStore};

const CLEAR: [u8; 4] = [10, 20, 30, 255];
const FILL: [u8; 4] = [200, 200, 200, 255];

fn options() -> CacheOptions {
    // 4x4 tiles of 256px.
    CacheOptions::new(1024, 1024, 256, 256).with_clear_color(CLEAR)
}

#[tokio::test]
async fn test_clear_resident_tile_pixels() {
    let options = options();
    let cache = cache_with(Arc::new(flat_store(&options, FILL)), options);

    cache.get_tile(5).await.unwrap();
    let report = cache
        .clear(&ClearOptions::shape(Rect::from_corners(300, 300, 500, 500)))
        .await
        .unwrap();
    assert_eq!(report.cleared, vec![5]);
    assert!(report.deferred.is_empty());

    let item = cache.get_tile(5).await.unwrap();
    let tile = item.read().await;
    assert_eq!(tile.pixel(400, 400), Some(Rgba(CLEAR)));
    assert_eq!(tile.pixel(299, 299), Some(Rgba(FILL)));
    assert_eq!(tile.pixel(500, 500), Some(Rgba(FILL)));
}

#[tokio::test]
async fn test_missing_tiles_then_clear_across_four_tiles() {
    let options = options();
    let cache = cache_with(Arc::new(flat_store(&options, FILL)), options);
    let rect = Rect::from_corners(300, 300, 600, 600);

    assert_eq!(cache.missing_tiles_in_region(&rect).await, vec![5, 6, 9, 10]);
    for index in [5, 6, 9, 10] {
        cache.get_tile(index).await.unwrap();
    }
    assert!(cache.missing_tiles_in_region(&rect).await.is_empty());

    let report = cache.clear(&ClearOptions::shape(rect)).await.unwrap();
    assert_eq!(report.cleared, vec![5, 6, 9, 10]);

    for (index, x, y) in [(5, 400, 400), (6, 550, 310), (9, 310, 550), (10, 599, 599)] {
        let item = cache.get_tile(index).await.unwrap();
        assert_eq!(item.read().await.pixel(x, y), Some(Rgba(CLEAR)), "tile {}", index);
    }
}

#[tokio::test]
async fn test_deferred_clear_applied_on_load() {
    let options = options();
    let store = Arc::new(flat_store(&options, FILL));
    let cache = cache_with(Arc::clone(&store), options);

    let report = cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 256, 256)))
        .await
        .unwrap();
    assert_eq!(report.deferred, vec![0]);
    assert_eq!(store.load_count(), 0);
    assert!(cache.pending_clear(0).await.unwrap());
    assert!(cache.dirty_for_sub_resolution(0).await.unwrap());

    let item = cache.get_tile(0).await.unwrap();
    {
        let tile = item.read().await;
        assert_eq!(tile.pixel(128, 128), Some(Rgba(CLEAR)));
        assert!(tile.is_modified());
    }
    assert!(!cache.pending_clear(0).await.unwrap());
    assert_eq!(cache.stats().await.applied_clears, 1);

    // Applied once: a reload after saving keeps the saved pixels only.
    assert_eq!(cache.save_tiles().await.unwrap(), 1);
    assert!(cache.discard_tile(0).await);
    cache.get_tile(0).await.unwrap();
    assert_eq!(cache.stats().await.applied_clears, 1);
}

#[tokio::test]
async fn test_mixed_cover_defers_and_loads() {
    let options = options();
    let store = Arc::new(flat_store(&options, FILL));
    let cache = cache_with(Arc::clone(&store), options);

    let report = cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 512, 300)))
        .await
        .unwrap();
    assert_eq!(report.deferred, vec![0, 1]);
    assert_eq!(report.cleared, vec![4, 5]);
    assert_eq!(store.load_count(), 2);
    assert_eq!(cache.resident_indices().await, vec![4, 5]);

    let item = cache.get_tile(4).await.unwrap();
    let tile = item.read().await;
    assert_eq!(tile.pixel(10, 299), Some(Rgba(CLEAR)));
    assert_eq!(tile.pixel(10, 300), Some(Rgba(FILL)));
}

#[tokio::test]
async fn test_failed_load_leaves_status_untouched() {
    let options = options();
    let store = Arc::new(TrackingStore::new(flat_store(&options, FILL)));
    store.fail_tile(4);
    let cache = cache_with(Arc::clone(&store), options);

    // Covers tile 0 fully and tile 4 partially.
    let clear = ClearOptions::shape(Rect::new(0, 0, 256, 300));
    let result = cache.clear(&clear).await;
    assert!(matches!(result, Err(RasterError::LoadFailed { index: 4, .. })));
    assert!(!cache.pending_clear(0).await.unwrap());
    assert!(!cache.dirty_for_sub_resolution(0).await.unwrap());
    assert_eq!(cache.stats().await.deferred_clears, 0);

    store.heal_tile(4);
    let report = cache.clear(&clear).await.unwrap();
    assert_eq!(report.deferred, vec![0]);
    assert_eq!(report.cleared, vec![4]);
    assert!(cache.pending_clear(0).await.unwrap());
}

#[tokio::test]
async fn test_load_if_needed_never_defers() {
    let options = options();
    let cache = cache_with(Arc::new(flat_store(&options, FILL)), options);

    let report = cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 256, 256)).with_load_if_needed())
        .await
        .unwrap();
    assert_eq!(report.cleared, vec![0]);
    assert!(!cache.pending_clear(0).await.unwrap());
}

#[tokio::test]
async fn test_clear_notifies_listeners() {
    let listener = Arc::new(RecordingListener::default());
    let options = options().with_resolution(2).with_listener(listener.clone());
    let cache = cache_with(Arc::new(flat_store(&options, FILL)), options);

    cache.get_tile(1).await.unwrap();
    cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 512, 256)))
        .await
        .unwrap();

    let mut changed = listener.changed();
    changed.sort_unstable();
    assert_eq!(changed, vec![(2, 0), (2, 1)]);
}

#[tokio::test]
async fn test_clear_racing_a_load() {
    let options = options();
    let store = Arc::new(
        TrackingStore::new(flat_store(&options, FILL)).with_delay(Duration::from_millis(20)),
    );
    let cache = cache_with(Arc::clone(&store), options);

    let loader = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.get_tile(0).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 256, 256)))
        .await
        .unwrap();
    let item = loader.await.unwrap();

    assert_eq!(item.read().await.pixel(100, 100), Some(Rgba(CLEAR)));
    assert!(!cache.pending_clear(0).await.unwrap());
    assert_eq!(store.loads_of(0), 1);
}
