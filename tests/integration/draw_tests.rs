//! Draw integration tests.
//!
//! Tests verify:
//! - Strategy selection by blending and pixel formats
//! - Strip-buffered draws match a single buffer exactly
//! - Allocation failure falls back to direct drawing with identical output
//! - Tiles that fail to load are skipped

use std::sync::Arc;

use image::Rgba;
use tiled_raster::{
    CacheOptions, Canvas, DrawBranch, DrawOptions, InMemoryTileStore, PixelFormat, Rect,
    Resampling, TiledRasterCache, Transform,
};

use super::test_utils::{
    cache_with, gradient_pixel, gradient_store, CountdownAllocator, LimitedAllocator,
    TrackingStore,
};

const BACKGROUND: Rgba<u8> = Rgba([30, 60, 90, 255]);

fn options() -> CacheOptions {
    // 4x4 tiles of 32px.
    CacheOptions::new(128, 128, 32, 32)
}

/// Store whose pixels carry a varying alpha so blending matters.
fn translucent_store(options: &CacheOptions) -> Arc<InMemoryTileStore> {
    let store = InMemoryTileStore::new("translucent");
    store.add_resolution_with(
        options.resolution,
        options.grid(),
        Arc::new(|x: i64, y: i64| {
            Rgba([
                (x * 2) as u8,
                (y * 2) as u8,
                ((x ^ y) & 0xFF) as u8,
                ((x * 7 + y * 3) % 256) as u8,
            ])
        }),
    );
    Arc::new(store)
}

fn background() -> Canvas {
    Canvas::filled(256, 256, PixelFormat::Rgba8, BACKGROUND)
}

async fn render(
    cache: &TiledRasterCache<InMemoryTileStore>,
    options: &DrawOptions,
) -> (Canvas, tiled_raster::DrawReport) {
    let mut canvas = background();
    let report = cache.draw(&mut canvas, options).await.unwrap();
    (canvas, report)
}

// =============================================================================
// Strategy Selection
// =============================================================================

#[tokio::test]
async fn test_branch_selection() {
    let options = options();
    let cache = cache_with(translucent_store(&options), options);

    let (_, report) = render(&cache, &DrawOptions::default().with_alpha_blend(false)).await;
    assert_eq!(report.branch, DrawBranch::Direct);
    assert_eq!(report.tiles_drawn, 16);

    let single = DrawOptions::default().with_region(Rect::new(40, 40, 10, 10));
    let (_, report) = render(&cache, &single).await;
    assert_eq!(report.branch, DrawBranch::SingleTile);
    assert_eq!(report.tiles_drawn, 1);

    let (_, report) = render(&cache, &DrawOptions::default()).await;
    assert_eq!(report.branch, DrawBranch::Buffered);
    assert_eq!(report.strips, 1);
    assert!(!report.fell_back);
}

#[tokio::test]
async fn test_opaque_raster_on_opaque_canvas_is_direct() {
    let options = options().with_format(PixelFormat::Rgb8);
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    let mut canvas = Canvas::new(128, 128, PixelFormat::Rgb8);
    let report = cache.draw(&mut canvas, &DrawOptions::default()).await.unwrap();
    assert_eq!(report.branch, DrawBranch::Direct);
    assert_eq!(canvas.pixel(100, 70), gradient_pixel(100, 70));
}

// =============================================================================
// Equivalences
// =============================================================================

#[tokio::test]
async fn test_strips_match_single_buffer() {
    let transform = Transform::scaling(2.0, 2.0).then(&Transform::translation(-3.0, -5.0));
    let draw = DrawOptions::default()
        .with_transform(transform)
        .with_resampling(Resampling::Bilinear);

    let whole_opts = options();
    let whole = cache_with(translucent_store(&whole_opts), whole_opts);
    let (expected, report) = render(&whole, &draw).await;
    assert_eq!(report.strips, 1);

    // Buffer rows are about 500 bytes, so 2KB strips hold 4 rows, 2 of them core.
    let strip_opts = options().with_temp_buffer_ceiling(2048);
    let strips = cache_with(translucent_store(&strip_opts), strip_opts);
    let (actual, report) = render(&strips, &draw).await;
    assert_eq!(report.branch, DrawBranch::Buffered);
    assert!(report.strips > 10);

    assert!(expected == actual, "strip-buffered draw differs from single buffer");
}

#[tokio::test]
async fn test_buffered_matches_direct_for_nearest() {
    let opts = options();
    let cache = cache_with(translucent_store(&opts), opts);
    let draw = DrawOptions::default().with_transform(Transform::scaling(2.0, 2.0));

    let (buffered, report) = render(&cache, &draw).await;
    assert_eq!(report.branch, DrawBranch::Buffered);

    // A refusing allocator forces the whole draw through the direct path.
    let direct_opts = options().with_allocator(Arc::new(LimitedAllocator::new(0)));
    let direct_cache = cache_with(translucent_store(&direct_opts), direct_opts);
    let (direct, report) = render(&direct_cache, &draw).await;
    assert!(report.fell_back);
    assert_eq!(report.strips, 0);

    assert!(buffered == direct);
}

#[tokio::test]
async fn test_fallback_after_some_strips() {
    let draw = DrawOptions::default().with_transform(Transform::translation(10.0, 10.0));

    let whole_opts = options();
    let whole = cache_with(translucent_store(&whole_opts), whole_opts);
    let (expected, _) = render(&whole, &draw).await;

    let flaky_opts = options()
        .with_temp_buffer_ceiling(4096)
        .with_allocator(Arc::new(CountdownAllocator::new(3)));
    let flaky = cache_with(translucent_store(&flaky_opts), flaky_opts);
    let (actual, report) = render(&flaky, &draw).await;

    assert_eq!(report.branch, DrawBranch::Buffered);
    assert_eq!(report.strips, 3);
    assert!(report.fell_back);
    assert!(expected == actual, "fallback output differs from buffered output");
}

// =============================================================================
// Geometry and Failures
// =============================================================================

#[tokio::test]
async fn test_model_transform_is_applied() {
    let options = options()
        .with_format(PixelFormat::Rgb8)
        .with_model(Transform::scaling(2.0, 2.0));
    let cache = cache_with(Arc::new(gradient_store(&options)), options);

    let mut canvas = Canvas::new(256, 256, PixelFormat::Rgb8);
    cache.draw(&mut canvas, &DrawOptions::default()).await.unwrap();
    assert_eq!(canvas.pixel(0, 0), gradient_pixel(0, 0));
    assert_eq!(canvas.pixel(201, 81), gradient_pixel(100, 40));
    assert_eq!(canvas.pixel(255, 255), gradient_pixel(127, 127));
}

#[tokio::test]
async fn test_region_limits_written_pixels() {
    let options = options();
    let cache = cache_with(translucent_store(&options), options);

    let draw = DrawOptions::default()
        .with_alpha_blend(false)
        .with_region(Rect::new(10, 10, 20, 20));
    let (canvas, _) = render(&cache, &draw).await;
    assert_eq!(canvas.pixel(9, 9), BACKGROUND);
    assert_eq!(canvas.pixel(30, 30), BACKGROUND);
    assert_ne!(canvas.pixel(15, 15), BACKGROUND);
    // Outside the raster nothing is drawn.
    assert_eq!(canvas.pixel(200, 200), BACKGROUND);
}

#[tokio::test]
async fn test_failed_tiles_are_skipped() {
    let options = options().with_format(PixelFormat::Rgb8);
    let store = Arc::new(TrackingStore::new(gradient_store(&options)));
    store.fail_tile(5);
    let cache = cache_with(Arc::clone(&store), options);

    let mut canvas = Canvas::filled(128, 128, PixelFormat::Rgb8, BACKGROUND);
    let report = cache.draw(&mut canvas, &DrawOptions::default()).await.unwrap();
    assert_eq!(report.tiles_skipped, 1);
    assert_eq!(report.tiles_drawn, 15);
    assert_eq!(canvas.pixel(40, 40), BACKGROUND);
    assert_eq!(canvas.pixel(70, 40), gradient_pixel(70, 40));
}
