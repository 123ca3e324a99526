//! Drawing a raster onto a canvas.
//!
//! Three strategies:
//!
//! - **Direct**: every tile is blitted straight onto the destination. Used
//!   when nothing is blended, or neither side has alpha.
//! - **Single tile**: only one tile intersects the region, so it is blended
//!   straight onto the destination.
//! - **Buffered**: tiles are first assembled into a temporary buffer, which
//!   is then blended once. The buffer is cut into horizontal strips when it
//!   would exceed the configured ceiling, and each strip carries the
//!   resampling neighbourhood so strips join seamlessly. If a buffer cannot be
//!   allocated the remaining rows are drawn directly instead.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::TiledRasterCache;
use crate::canvas::{allocate_image, blit, Canvas, Resampling, SourceView};
use crate::error::RasterError;
use crate::geometry::{Rect, Transform};
use crate::grid::TileIndex;
use crate::store::TileStore;

/// Options for [`TiledRasterCache::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawOptions {
    /// Composite with source-over instead of replacing destination pixels
    pub alpha_blend: bool,

    /// Model → destination transform
    pub transform: Transform,

    pub resampling: Resampling,

    /// Destination region to draw; the whole canvas when `None`
    pub region: Option<Rect>,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            alpha_blend: true,
            transform: Transform::identity(),
            resampling: Resampling::Nearest,
            region: None,
        }
    }
}

impl DrawOptions {
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = resampling;
        self
    }

    pub fn with_region(mut self, region: Rect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_alpha_blend(mut self, alpha_blend: bool) -> Self {
        self.alpha_blend = alpha_blend;
        self
    }
}

/// Strategy a draw used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawBranch {
    Direct,
    SingleTile,
    Buffered,
}

/// What a draw did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawReport {
    pub branch: DrawBranch,
    pub tiles_drawn: usize,
    pub tiles_skipped: usize,

    /// Temporary buffers composited (Buffered only)
    pub strips: usize,

    /// A buffer allocation failed and the rest was drawn directly
    pub fell_back: bool,
}

impl DrawReport {
    fn new(branch: DrawBranch) -> Self {
        Self {
            branch,
            tiles_drawn: 0,
            tiles_skipped: 0,
            strips: 0,
            fell_back: false,
        }
    }
}

/// Per-draw geometry shared by the strategies.
struct DrawPlan {
    /// Raster → destination
    to_dest: Transform,
    /// Destination pixels that may be written
    dest_region: Rect,
    /// Raster pixels the region samples from, clamped to the raster
    extent: Rect,
}

impl<S: TileStore + 'static> TiledRasterCache<S> {
    /// Draw the raster onto `canvas`.
    ///
    /// Tiles that fail to load are skipped; their destination pixels keep
    /// whatever they held before.
    pub async fn draw(
        &self,
        canvas: &mut Canvas,
        options: &DrawOptions,
    ) -> Result<DrawReport, RasterError> {
        let to_dest = options.transform.then(&self.options.model);
        let inverse = to_dest.inverse()?;

        let canvas_bounds = canvas.bounds();
        let requested = options.region.unwrap_or(canvas_bounds);
        let dest_region = requested.intersect(&canvas_bounds);
        let extent = dest_region.and_then(|region| {
            inverse
                .map_rect(&region)
                .intersect(&self.grid.raster_rect())
        });

        let blending = options.alpha_blend
            && (self.options.format.has_alpha() || canvas.format().has_alpha());

        let (Some(dest_region), Some(extent)) = (dest_region, extent) else {
            let branch = if blending {
                DrawBranch::Buffered
            } else {
                DrawBranch::Direct
            };
            return Ok(DrawReport::new(branch));
        };

        let plan = DrawPlan {
            to_dest,
            dest_region,
            extent,
        };
        let tiles: Vec<TileIndex> = self.grid.tiles_in(&extent).collect();

        let report = if !blending {
            let mut report = DrawReport::new(DrawBranch::Direct);
            let limit = self.grid.raster_rect();
            self.draw_direct(canvas, options, &plan, &tiles, &limit, options.alpha_blend, &mut report)
                .await?;
            report
        } else if tiles.len() == 1 {
            let mut report = DrawReport::new(DrawBranch::SingleTile);
            let limit = self.grid.raster_rect();
            self.draw_direct(canvas, options, &plan, &tiles, &limit, true, &mut report)
                .await?;
            report
        } else {
            self.draw_buffered(canvas, options, &plan).await?
        };

        debug!(
            branch = ?report.branch,
            tiles = report.tiles_drawn,
            skipped = report.tiles_skipped,
            strips = report.strips,
            fell_back = report.fell_back,
            "Draw finished"
        );
        Ok(report)
    }

    /// Blit each tile straight onto the canvas, restricted to the raster
    /// pixels inside `limit`.
    #[allow(clippy::too_many_arguments)]
    async fn draw_direct(
        &self,
        canvas: &mut Canvas,
        options: &DrawOptions,
        plan: &DrawPlan,
        tiles: &[TileIndex],
        limit: &Rect,
        blend: bool,
        report: &mut DrawReport,
    ) -> Result<(), RasterError> {
        let dest_has_alpha = canvas.format().has_alpha();
        for &index in tiles {
            let item = match self.get_tile(index).await {
                Ok(item) => item,
                Err(e) if e.is_load_failure() => {
                    warn!(index, error = %e, "Skipping tile in draw");
                    report.tiles_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let tile = item.read().await;
            let (ox, oy) = tile.origin();
            let Some(window) = tile.extent().intersect(&limit.translate(-ox, -oy)) else {
                continue;
            };
            let Some(view) = SourceView::new(tile.image(), tile.extent(), window) else {
                continue;
            };
            let transform = options.transform.then(&tile.transform());
            blit(
                canvas.image_mut(),
                dest_has_alpha,
                &view,
                &transform,
                &plan.dest_region,
                options.resampling,
                blend,
            )?;
            report.tiles_drawn += 1;
        }
        Ok(())
    }

    async fn draw_buffered(
        &self,
        canvas: &mut Canvas,
        options: &DrawOptions,
        plan: &DrawPlan,
    ) -> Result<DrawReport, RasterError> {
        let mut report = DrawReport::new(DrawBranch::Buffered);
        let raster = self.grid.raster_rect();
        let extent = plan.extent;
        let nb = options.resampling.neighborhood();

        // The whole buffer: extent plus resampling neighbourhood.
        let Some(full) = extent.expand(nb).intersect(&raster) else {
            return Ok(report);
        };
        let row_bytes = (full.width() as usize).saturating_mul(4).max(1);
        let total = row_bytes.saturating_mul(full.height() as usize);
        let ceiling = self.options.temp_buffer_ceiling;

        let core_height = if total <= ceiling {
            extent.height() as i64
        } else {
            let strip_height = (ceiling / row_bytes) as i64;
            (strip_height - 2 * nb).max(1)
        };

        let dest_has_alpha = canvas.format().has_alpha();
        let allocator = self.options.allocator.as_ref();
        let mut y = extent.y0;
        while y < extent.y1 {
            let core = Rect::from_corners(extent.x0, y, extent.x1, (y + core_height).min(extent.y1));
            let buffer_rect = Rect::from_corners(
                full.x0,
                (core.y0 - nb).max(full.y0),
                full.x1,
                (core.y1 + nb).min(full.y1),
            );

            let mut buffer = match allocate_image(
                allocator,
                buffer_rect.width() as u32,
                buffer_rect.height() as u32,
            ) {
                Ok(buffer) => buffer,
                Err(RasterError::OutOfMemory { requested }) => {
                    warn!(
                        requested,
                        row = core.y0,
                        "Temporary buffer allocation failed, drawing remaining rows directly"
                    );
                    report.fell_back = true;
                    let limit = Rect::from_corners(raster.x0, core.y0, raster.x1, raster.y1);
                    let rest = Rect::from_corners(extent.x0, core.y0, extent.x1, extent.y1);
                    let tiles: Vec<TileIndex> = self.grid.tiles_in(&rest).collect();
                    self.draw_direct(canvas, options, plan, &tiles, &limit, true, &mut report)
                        .await?;
                    break;
                }
                Err(e) => return Err(e),
            };

            // Assemble the strip from raw tile pixels.
            let buffer_bounds = Rect::new(0, 0, buffer_rect.width(), buffer_rect.height());
            for index in self.grid.tiles_in(&buffer_rect) {
                let item = match self.get_tile(index).await {
                    Ok(item) => item,
                    Err(e) if e.is_load_failure() => {
                        warn!(index, error = %e, "Skipping tile in draw");
                        report.tiles_skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let tile = item.read().await;
                let (ox, oy) = tile.origin();
                let Some(view) = SourceView::new(tile.image(), tile.extent(), tile.extent()) else {
                    continue;
                };
                let placement =
                    Transform::translation((ox - buffer_rect.x0) as f64, (oy - buffer_rect.y0) as f64);
                blit(
                    &mut buffer,
                    true,
                    &view,
                    &placement,
                    &buffer_bounds,
                    Resampling::Nearest,
                    false,
                )?;
                report.tiles_drawn += 1;
            }

            // Composite only the strip's own rows; the margins are context.
            let window = core.translate(-buffer_rect.x0, -buffer_rect.y0);
            if let Some(view) = SourceView::new(&buffer, buffer_bounds, window) {
                let transform = plan.to_dest.then(&Transform::translation(
                    buffer_rect.x0 as f64,
                    buffer_rect.y0 as f64,
                ));
                blit(
                    canvas.image_mut(),
                    dest_has_alpha,
                    &view,
                    &transform,
                    &plan.dest_region,
                    options.resampling,
                    true,
                )?;
            }
            report.strips += 1;
            y = core.y1;
        }

        Ok(report)
    }
}
