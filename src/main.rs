//! Tiled Raster - command-line driver for the tile cache.
//!
//! Builds a cache over a synthetic raster and either renders a region to
//! JPEG or prints the raster's statistics.

use clap::Parser;
use image::Rgba;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiled_raster::{
    config::{Cli, Command, RasterArgs, RenderConfig, StatsConfig, StatsOutputFormat},
    encode_jpeg, Canvas, ClearOptions, DrawOptions, HistogramOptions, HistogramSampling,
    InMemoryTileStore, MemoryPool, PaletteParams, PixelFormat, PoolConfig, Rect, RasterError,
    TiledRasterCache, Transform,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Render(config) => run_render(config).await,
        Command::Stats(config) => run_stats(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tiled_raster=debug"
    } else {
        "tiled_raster=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build a cache over a synthetic raster and apply the requested clears.
async fn open_cache(
    args: &RasterArgs,
) -> Result<Arc<TiledRasterCache<InMemoryTileStore>>, String> {
    let options = args.cache_options()?;
    let budget = args.pool_budget_bytes()?;

    let store = Arc::new(InMemoryTileStore::new("synthetic"));
    store.add_resolution_with(
        options.resolution,
        options.grid(),
        Arc::new(|x: i64, y: i64| {
            // Diagonal gradient with a 64px checker in the blue channel.
            let checker = if ((x / 64) + (y / 64)) % 2 == 0 { 64 } else { 192 };
            Rgba([(x % 256) as u8, (y % 256) as u8, checker, 255])
        }),
    );

    let pool = Arc::new(MemoryPool::with_config(PoolConfig::with_budget(budget)));
    let cache = TiledRasterCache::new(store, pool, options).map_err(|e| e.to_string())?;

    for rect in &args.clears {
        let report = cache
            .clear(&ClearOptions::shape(*rect))
            .await
            .map_err(|e| e.to_string())?;
        info!(
            "Cleared {:?}: {} tile(s) now, {} deferred",
            rect,
            report.cleared.len(),
            report.deferred.len()
        );
    }

    Ok(cache)
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    init_logging(config.raster.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = match open_cache(&config.raster).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to open raster: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Raster: {}x{}", config.raster.width, config.raster.height);
    info!(
        "  Tiles: {}px, {} total",
        config.raster.tile_size,
        cache.grid().tile_count()
    );
    info!("  Pool budget: {}", config.raster.pool_budget);
    info!("  Buffer ceiling: {}", config.raster.buffer_ceiling);

    let mut canvas = Canvas::new(config.out_width, config.out_height, PixelFormat::Rgba8);
    let transform = Transform::scaling(config.scale, config.scale).then(&Transform::translation(
        -config.x as f64,
        -config.y as f64,
    ));
    let options = DrawOptions::default()
        .with_transform(transform)
        .with_resampling(config.resampling.into());

    let report = match cache.draw(&mut canvas, &options).await {
        Ok(report) => report,
        Err(e) => {
            error!("Draw failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Drew {} tile(s) via {:?} ({} strip(s), {} skipped)",
        report.tiles_drawn, report.branch, report.strips, report.tiles_skipped
    );

    let jpeg = match encode_jpeg(&canvas, config.quality) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            error!("Encoding failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::fs::write(&config.output, &jpeg).await {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    let stats = cache.stats().await;
    info!(
        "Wrote {} ({} bytes); {} loads, {} evictions, {} resident",
        config.output.display(),
        jpeg.len(),
        stats.loads,
        stats.evictions,
        stats.resident
    );

    ExitCode::SUCCESS
}

// =============================================================================
// Stats Command
// =============================================================================

async fn run_stats(config: StatsConfig) -> ExitCode {
    if config.raster.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = match open_cache(&config.raster).await {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match collect_stats(&cache, &config).await {
        Ok(summary) => {
            print_stats(&summary, config.format);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[derive(serde::Serialize)]
struct StatsSummary {
    width: u64,
    height: u64,
    tiles: u64,
    outcome: tiled_raster::ScanOutcome,
    histogram: tiled_raster::Histogram,
    palette: tiled_raster::RepresentativePalette,
    cache: tiled_raster::CacheStats,
}

async fn collect_stats(
    cache: &TiledRasterCache<InMemoryTileStore>,
    config: &StatsConfig,
) -> Result<StatsSummary, RasterError> {
    let sampling = HistogramSampling {
        tiles_to_scan_percentage: config.percentage,
        buckets: config.buckets,
        ..HistogramSampling::default()
    };
    let mut histogram = tiled_raster::Histogram::rgba(config.buckets);
    let outcome = cache
        .compute_histogram(&HistogramOptions::new(sampling), &mut histogram, false)
        .await?;

    let palette = cache
        .representative_palette(&PaletteParams {
            max_entries: config.palette,
            tiles_to_scan_percentage: config.percentage,
            ..PaletteParams::default()
        })
        .await?;

    let raster: Rect = cache.grid().raster_rect();
    Ok(StatsSummary {
        width: raster.width(),
        height: raster.height(),
        tiles: cache.grid().tile_count(),
        outcome,
        histogram,
        palette,
        cache: cache.stats().await,
    })
}

fn print_stats(summary: &StatsSummary, format: StatsOutputFormat) {
    match format {
        StatsOutputFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: {}", e),
        },
        StatsOutputFormat::Text => {
            println!("Raster Statistics");
            println!("═════════════════");
            println!("Size:    {}x{}", summary.width, summary.height);
            println!("Tiles:   {}", summary.tiles);
            println!("Scan:    {:?}", summary.outcome);
            println!();
            println!("Histogram ({} buckets):", summary.histogram.buckets());
            for (channel, name) in ["R", "G", "B", "A"].iter().enumerate() {
                let counts = summary.histogram.channel(channel);
                let line: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
                println!("  {}: {}", name, line.join(" "));
            }
            println!();
            println!("Palette ({} entries):", summary.palette.len());
            for (color, count) in summary.palette.colors.iter().zip(&summary.palette.counts) {
                println!(
                    "  #{:02x}{:02x}{:02x}{:02x}  {}",
                    color[0], color[1], color[2], color[3], count
                );
            }
            println!();
            println!(
                "Cache:   {} loads, {} evictions, {} resident",
                summary.cache.loads, summary.cache.evictions, summary.cache.resident
            );
        }
    }
}
