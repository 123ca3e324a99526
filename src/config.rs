//! Command-line configuration for the `tiled-raster` binary.
//!
//! The binary drives a cache over a synthetic in-memory raster, which makes
//! it useful for exercising pool budgets, strip buffering and the
//! histogram/palette scans from a shell.
//!
//! # Environment Variables
//!
//! Shared raster options can be set via environment variables with the
//! `RASTER_` prefix:
//!
//! - `RASTER_WIDTH` / `RASTER_HEIGHT` - Raster size in pixels (default: 4096)
//! - `RASTER_TILE_SIZE` - Square tile edge in pixels (default: 256)
//! - `RASTER_POOL_BUDGET` - Memory pool budget, e.g. `64MB` (default: 256MB)
//! - `RASTER_BUFFER_CEILING` - Largest temporary draw buffer (default: 64MB)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::canvas::Resampling;
use crate::export::DEFAULT_JPEG_QUALITY;
use crate::geometry::Rect;
use crate::pool::DEFAULT_POOL_BUDGET;
use crate::raster::{CacheOptions, DEFAULT_TEMP_BUFFER_CEILING};

/// Default raster edge in pixels.
pub const DEFAULT_RASTER_SIZE: u64 = 4096;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiled Raster - a bounded-memory tile cache for very large rasters.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiled-raster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Draw a region of the raster and write it as JPEG
    Render(RenderConfig),

    /// Print the raster's histogram and representative palette
    Stats(StatsConfig),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct RasterArgs {
    /// Raster width in pixels.
    #[arg(long, default_value_t = DEFAULT_RASTER_SIZE, env = "RASTER_WIDTH")]
    pub width: u64,

    /// Raster height in pixels.
    #[arg(long, default_value_t = DEFAULT_RASTER_SIZE, env = "RASTER_HEIGHT")]
    pub height: u64,

    /// Square tile edge in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "RASTER_TILE_SIZE")]
    pub tile_size: u32,

    /// Memory pool budget (e.g. "64MB", "1GB").
    #[arg(long, default_value = "256MB", env = "RASTER_POOL_BUDGET")]
    pub pool_budget: String,

    /// Largest temporary buffer a draw may allocate (e.g. "8MB").
    #[arg(long, default_value = "64MB", env = "RASTER_BUFFER_CEILING")]
    pub buffer_ceiling: String,

    /// Rectangles to clear before the command runs, as "x,y,w,h".
    #[arg(long = "clear", value_parser = parse_rect)]
    pub clears: Vec<Rect>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RasterArgs {
    /// Validate the shared options.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.pool_budget_bytes()? == 0 {
            return Err("pool_budget must be greater than 0".to_string());
        }
        if self.buffer_ceiling_bytes()? == 0 {
            return Err("buffer_ceiling must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn pool_budget_bytes(&self) -> Result<usize, String> {
        parse_size(&self.pool_budget)
            .map_err(|e| format!("invalid pool_budget '{}': {}", self.pool_budget, e))
    }

    pub fn buffer_ceiling_bytes(&self) -> Result<usize, String> {
        parse_size(&self.buffer_ceiling)
            .map_err(|e| format!("invalid buffer_ceiling '{}': {}", self.buffer_ceiling, e))
    }

    /// Cache options for the configured raster.
    pub fn cache_options(&self) -> Result<CacheOptions, String> {
        Ok(
            CacheOptions::new(self.width, self.height, self.tile_size, self.tile_size)
                .with_temp_buffer_ceiling(self.buffer_ceiling_bytes()?),
        )
    }
}

/// Resampling filter selectable from the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingArg {
    #[default]
    Nearest,
    Bilinear,
}

impl From<ResamplingArg> for Resampling {
    fn from(arg: ResamplingArg) -> Self {
        match arg {
            ResamplingArg::Nearest => Resampling::Nearest,
            ResamplingArg::Bilinear => Resampling::Bilinear,
        }
    }
}

/// Configuration for the `render` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    #[command(flatten)]
    pub raster: RasterArgs,

    /// Output JPEG path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Left edge of the rendered region, in raster pixels.
    #[arg(long, default_value_t = 0)]
    pub x: i64,

    /// Top edge of the rendered region, in raster pixels.
    #[arg(long, default_value_t = 0)]
    pub y: i64,

    /// Output width in pixels.
    #[arg(long, default_value_t = 1024)]
    pub out_width: u32,

    /// Output height in pixels.
    #[arg(long, default_value_t = 1024)]
    pub out_height: u32,

    /// Output pixels per raster pixel.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// Resampling filter.
    #[arg(long, value_enum, default_value_t = ResamplingArg::Nearest)]
    pub resampling: ResamplingArg,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "RASTER_JPEG_QUALITY")]
    pub quality: u8,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.raster.validate()?;
        if self.out_width == 0 || self.out_height == 0 {
            return Err("output dimensions must be greater than 0".to_string());
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(format!("scale must be positive (got {})", self.scale));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }
        Ok(())
    }
}

/// Output format for the `stats` subcommand.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsOutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON document
    Json,
}

/// Configuration for the `stats` subcommand.
#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    #[command(flatten)]
    pub raster: RasterArgs,

    /// Percentage of tiles to scan when no region is given (1-100).
    #[arg(long, default_value_t = 100)]
    pub percentage: u8,

    /// Histogram buckets per channel (1-256).
    #[arg(long, default_value_t = 16)]
    pub buckets: usize,

    /// Maximum palette entries.
    #[arg(long, default_value_t = 8)]
    pub palette: usize,

    /// Output format.
    #[arg(long, value_enum, default_value_t = StatsOutputFormat::Text)]
    pub format: StatsOutputFormat,
}

impl StatsConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.raster.validate()?;
        if self.percentage == 0 || self.percentage > 100 {
            return Err("percentage must be between 1 and 100".to_string());
        }
        if self.buckets == 0 || self.buckets > 256 {
            return Err("buckets must be between 1 and 256".to_string());
        }
        if self.palette == 0 {
            return Err("palette must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Parsers
// =============================================================================

/// Parse a byte size such as "512", "64KB", "256MB" or "1GB".
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };
    let value: usize = digits
        .trim()
        .parse()
        .map_err(|_| format!("expected a size like 64MB, got '{}'", s))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", s))
}

/// Parse a rectangle given as "x,y,w,h".
pub fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected x,y,w,h, got '{}'", s));
    }
    let x: i64 = parts[0].parse().map_err(|_| format!("invalid x in '{}'", s))?;
    let y: i64 = parts[1].parse().map_err(|_| format!("invalid y in '{}'", s))?;
    let w: u64 = parts[2].parse().map_err(|_| format!("invalid width in '{}'", s))?;
    let h: u64 = parts[3].parse().map_err(|_| format!("invalid height in '{}'", s))?;
    Ok(Rect::new(x, y, w, h))
}

/// Default pool budget as a human-readable string.
pub fn default_pool_budget_label() -> String {
    format!("{}MB", DEFAULT_POOL_BUDGET / (1024 * 1024))
}

/// Default buffer ceiling as a human-readable string.
pub fn default_buffer_ceiling_label() -> String {
    format!("{}MB", DEFAULT_TEMP_BUFFER_CEILING / (1024 * 1024))
}

// =============================================================================
// Tests
// =============================================================================
