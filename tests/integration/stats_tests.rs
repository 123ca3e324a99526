//! Histogram and palette integration tests.

use std::sync::Arc;

use tiled_raster::{
    CacheOptions, ClearOptions, Histogram, HistogramOptions, HistogramSampling, PaletteParams,
    Rect, Region, ScanOutcome,
};

use super::test_utils::{cache_with, flat_store, gradient_store, LimitedAllocator, TrackingStore};

fn options() -> CacheOptions {
    // 3x3 tiles of 32px, the last row and column clipped to 16px.
    CacheOptions::new(80, 80, 32, 32)
}

fn region_options(rect: Rect) -> HistogramOptions {
    HistogramOptions::new(HistogramSampling::region(Region::from_rect(rect)))
}

#[tokio::test]
async fn test_histogram_is_additive_over_disjoint_regions() {
    let options = options();
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    let mut whole = Histogram::rgba(256);
    cache
        .compute_histogram(&region_options(Rect::new(0, 0, 80, 80)), &mut whole, true)
        .await
        .unwrap();

    // Split along a line that crosses tile boundaries.
    let mut parts = Histogram::rgba(256);
    for rect in [Rect::new(0, 0, 80, 45), Rect::new(0, 45, 80, 35)] {
        cache
            .compute_histogram(&region_options(rect), &mut parts, true)
            .await
            .unwrap();
    }

    assert_eq!(whole.total(0), 6400);
    assert_eq!(whole, parts);
}

#[tokio::test]
async fn test_full_histogram_matches_region_histogram() {
    let options = options();
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    let mut full = Histogram::rgba(16);
    let sampling = HistogramSampling {
        buckets: 16,
        ..HistogramSampling::default()
    };
    cache
        .compute_histogram(&HistogramOptions::new(sampling), &mut full, false)
        .await
        .unwrap();

    let mut region = Histogram::rgba(16);
    let sampling = HistogramSampling {
        buckets: 16,
        ..HistogramSampling::region(Region::from_rect(Rect::new(-10, -10, 500, 500)))
    };
    cache
        .compute_histogram(&HistogramOptions::new(sampling), &mut region, false)
        .await
        .unwrap();

    assert_eq!(full, region);
}

#[tokio::test]
async fn test_histogram_accumulates_into_output() {
    let options = options();
    let cache = cache_with(Arc::new(flat_store(&options, [7, 7, 7, 255])), options);

    let mut out = Histogram::rgba(256);
    cache
        .compute_histogram(&HistogramOptions::default(), &mut out, false)
        .await
        .unwrap();
    cache
        .compute_histogram(&HistogramOptions::default(), &mut out, false)
        .await
        .unwrap();
    assert_eq!(out.count(0, 7), 2 * 6400);
}

#[tokio::test]
async fn test_histogram_skips_failed_tiles() {
    let options = options();
    let store = Arc::new(TrackingStore::new(flat_store(&options, [1, 2, 3, 255])));
    store.fail_tile(4);
    let cache = cache_with(Arc::clone(&store), options);

    let mut out = Histogram::rgba(256);
    let outcome = cache
        .compute_histogram(&HistogramOptions::default(), &mut out, false)
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { tiles_scanned: 8 });
    assert_eq!(out.total(0), 6400 - 32 * 32);
}

#[tokio::test]
async fn test_partial_histogram_is_not_cached() {
    let options = options();
    let store = Arc::new(TrackingStore::new(flat_store(&options, [1, 2, 3, 255])));
    store.fail_tile(4);
    let cache = cache_with(Arc::clone(&store), options);

    let mut partial = Histogram::rgba(256);
    cache
        .compute_histogram(&HistogramOptions::default(), &mut partial, false)
        .await
        .unwrap();
    assert_eq!(partial.total(0), 6400 - 32 * 32);

    store.heal_tile(4);
    let mut full = Histogram::rgba(256);
    let outcome = cache
        .compute_histogram(&HistogramOptions::default(), &mut full, false)
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { tiles_scanned: 9 });
    assert_eq!(full.total(0), 6400);

    let mut cached = Histogram::rgba(256);
    let outcome = cache
        .compute_histogram(&HistogramOptions::default(), &mut cached, false)
        .await
        .unwrap();
    assert_eq!(outcome, ScanOutcome::Cached);
    assert_eq!(cached.total(0), 6400);
}

#[tokio::test]
async fn test_partial_palette_is_not_cached() {
    let options = options();
    let store = Arc::new(TrackingStore::new(flat_store(&options, [9, 9, 9, 255])));
    store.fail_tile(0);
    let cache = cache_with(Arc::clone(&store), options);
    let params = PaletteParams::with_max_entries(4);

    let partial = cache.representative_palette(&params).await.unwrap();
    assert_eq!(partial.counts, vec![6400 - 32 * 32]);

    store.heal_tile(0);
    let full = cache.representative_palette(&params).await.unwrap();
    assert_eq!(full.counts, vec![6400]);
}

#[tokio::test]
async fn test_stride_sampling_selects_every_nth_tile() {
    let options = options();
    let store = Arc::new(TrackingStore::new(gradient_store(&options)));
    let cache = cache_with(Arc::clone(&store), options);

    let sampling = HistogramSampling {
        tiles_to_scan_percentage: 30,
        ..HistogramSampling::default()
    };
    let mut out = Histogram::rgba(256);
    let outcome = cache
        .compute_histogram(&HistogramOptions::new(sampling), &mut out, false)
        .await
        .unwrap();

    // 100 / 30 truncates to a stride of 3.
    assert_eq!(outcome, ScanOutcome::Completed { tiles_scanned: 3 });
    assert_eq!(cache.resident_indices().await, vec![0, 3, 6]);
    assert_eq!(store.total_loads(), 3);
}

#[tokio::test]
async fn test_clear_changes_palette() {
    let options = options().with_clear_color([0, 0, 255, 255]);
    let cache = cache_with(Arc::new(flat_store(&options, [255, 0, 0, 255])), options);
    let params = PaletteParams::with_max_entries(4);

    let before = cache.representative_palette(&params).await.unwrap();
    assert_eq!(before.colors, vec![[255, 0, 0, 255]]);

    cache
        .clear(&ClearOptions::shape(Rect::new(0, 0, 64, 64)))
        .await
        .unwrap();
    let after = cache.representative_palette(&params).await.unwrap();

    assert_eq!(after.len(), 2);
    let red = after.colors.iter().position(|c| *c == [255, 0, 0, 255]).unwrap();
    let blue = after.colors.iter().position(|c| *c == [0, 0, 255, 255]).unwrap();
    assert_eq!(after.counts[red], 6400 - 64 * 64);
    assert_eq!(after.counts[blue], 64 * 64);
}

#[tokio::test]
async fn test_palette_out_of_memory_is_empty() {
    let options = options().with_allocator(Arc::new(LimitedAllocator::new(0)));
    let cache = cache_with(Arc::new(flat_store(&options, [1, 1, 1, 255])), options);

    let palette = cache
        .representative_palette(&PaletteParams::default())
        .await
        .unwrap();
    assert!(palette.is_empty());
}
