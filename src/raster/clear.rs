//! Region clears.
//!
//! Resident tiles are cleared in place. A tile that is not resident and
//! lies entirely inside the cleared shape is not loaded at all: its
//! pending-clear flag is set instead and the next load applies it. Tiles the
//! shape only partly covers are loaded, since the flag can only express a
//! whole-tile clear.

use std::sync::Arc;

use tracing::debug;

use super::TiledRasterCache;
use crate::error::RasterError;
use crate::geometry::{Rect, Region, RleMask};
use crate::grid::TileIndex;
use crate::store::TileStore;
use crate::tile::{Tile, TilePoolItem, Transaction};

/// How the cleared pixels are described.
#[derive(Debug, Clone, PartialEq)]
pub enum ClearMode {
    /// Union of rectangles in raster coordinates
    Shape(Region),
    /// Run-length mask in raster coordinates
    Rle(RleMask),
    /// Scanline-driven clear; not implemented
    Scanlines,
}

/// Options for [`TiledRasterCache::clear`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClearOptions {
    pub mode: ClearMode,

    /// Intersect the shape with the raster's own clip shape first
    pub apply_raster_clip: bool,

    /// Load tiles that are not resident instead of deferring their clear
    pub load_if_needed: bool,
}

impl ClearOptions {
    pub fn shape(region: impl Into<Region>) -> Self {
        Self {
            mode: ClearMode::Shape(region.into()),
            apply_raster_clip: false,
            load_if_needed: false,
        }
    }

    pub fn rle(mask: RleMask) -> Self {
        Self {
            mode: ClearMode::Rle(mask),
            apply_raster_clip: false,
            load_if_needed: false,
        }
    }

    pub fn scanlines() -> Self {
        Self {
            mode: ClearMode::Scanlines,
            apply_raster_clip: false,
            load_if_needed: false,
        }
    }

    pub fn with_raster_clip(mut self) -> Self {
        self.apply_raster_clip = true;
        self
    }

    pub fn with_load_if_needed(mut self) -> Self {
        self.load_if_needed = true;
        self
    }
}

/// Which tiles a clear touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Tiles whose pixels were cleared now
    pub cleared: Vec<TileIndex>,
    /// Tiles flagged to be cleared on their next load
    pub deferred: Vec<TileIndex>,
}

enum ClearTarget<'a> {
    Shape(Region),
    Runs(&'a RleMask),
}

impl ClearTarget<'_> {
    fn bounds(&self) -> Option<Rect> {
        match self {
            ClearTarget::Shape(region) => region.bounds(),
            ClearTarget::Runs(mask) => mask.bounds(),
        }
    }

    fn intersects(&self, rect: &Rect) -> bool {
        match self {
            ClearTarget::Shape(region) => region.intersects(rect),
            ClearTarget::Runs(mask) => mask.intersects(rect),
        }
    }

    fn covers(&self, rect: &Rect) -> bool {
        match self {
            ClearTarget::Shape(region) => region.covers(rect),
            ClearTarget::Runs(mask) => mask.covers(rect),
        }
    }

    fn apply(&self, tile: &mut Tile) -> bool {
        match self {
            ClearTarget::Shape(region) => tile.clear_region(region),
            ClearTarget::Runs(mask) => tile.clear_runs(mask),
        }
    }
}

enum Action {
    Edit(Arc<TilePoolItem>),
    Deferred,
}

impl<S: TileStore + 'static> TiledRasterCache<S> {
    /// Clear the pixels selected by `options` to the cache's clear colour.
    ///
    /// Every tile that has to be loaded is loaded before any pixel or status
    /// flag changes, so a `LoadFailed` leaves the raster as it was.
    pub async fn clear(&self, options: &ClearOptions) -> Result<ClearReport, RasterError> {
        let raster = self.grid.raster_rect();
        let target = match &options.mode {
            ClearMode::Scanlines => {
                return Err(RasterError::NotSupported(
                    "scanline-driven clear".to_string(),
                ))
            }
            ClearMode::Shape(region) => {
                let mut shape = region.intersect_rect(&raster);
                if options.apply_raster_clip {
                    if let Some(clip) = &self.options.clip {
                        shape = shape.intersect(clip);
                    }
                }
                ClearTarget::Shape(shape)
            }
            ClearMode::Rle(mask) => ClearTarget::Runs(mask),
        };

        let mut report = ClearReport::default();
        let Some(bounds) = target.bounds().and_then(|b| b.intersect(&raster)) else {
            return Ok(report);
        };

        let transaction = self.active_transaction().await;
        let force_load = options.load_if_needed || transaction.is_some();

        let mut plan = Vec::new();
        for index in self.grid.tiles_in(&bounds) {
            let Some(tile_rect) = self
                .grid
                .tile_rect(index)
                .and_then(|rect| rect.intersect(&raster))
            else {
                continue;
            };
            if !target.intersects(&tile_rect) {
                continue;
            }

            let (resident, deferrable) = {
                let state = self.state.lock().await;
                let resident = state
                    .tiles
                    .get(&index)
                    .filter(|item| !item.is_invalidated())
                    .cloned();
                let deferrable =
                    !force_load && state.status.is_enabled() && target.covers(&tile_rect);
                (resident, deferrable)
            };
            let action = match resident {
                Some(item) => Action::Edit(item),
                None if deferrable => Action::Deferred,
                None => Action::Edit(self.get_tile_by_index(index, false).await?),
            };
            plan.push((index, action));
        }

        for (index, action) in plan {
            let item = match action {
                Action::Edit(item) => item,
                Action::Deferred => {
                    // Residency check and flag update happen under one lock so
                    // a concurrent load either sees the flag or is seen here.
                    let mut state = self.state.lock().await;
                    let resident = state
                        .tiles
                        .get(&index)
                        .filter(|item| !item.is_invalidated())
                        .cloned();
                    match resident {
                        Some(item) => item,
                        None => {
                            state.status.set_clear_flag(index, true)?;
                            state.status.set_dirty_for_sub_res_flag(index, true)?;
                            state.content_changed();
                            drop(state);
                            super::bump(&self.counters.deferred_clears);
                            self.notify_content_changed(index);
                            report.deferred.push(index);
                            continue;
                        }
                    }
                }
            };
            if self.edit_tile(item, &target, &transaction).await? {
                report.cleared.push(index);
            }
        }

        debug!(
            cleared = report.cleared.len(),
            deferred = report.deferred.len(),
            resolution = self.options.resolution,
            "Clear finished"
        );
        Ok(report)
    }

    /// Apply a clear to one resident tile with the active transaction
    /// swapped in for the duration of the edit.
    async fn edit_tile(
        &self,
        item: Arc<TilePoolItem>,
        target: &ClearTarget<'_>,
        transaction: &Option<Arc<Transaction>>,
    ) -> Result<bool, RasterError> {
        let index = item.index();
        let mut item = item;
        let changed = loop {
            let mut tile = item.write().await;
            if item.is_retired() || item.is_invalidated() {
                // Evicted or gone stale between lookup and edit; edit the
                // current copy instead.
                drop(tile);
                item = self.get_tile_by_index(index, false).await?;
                continue;
            }
            let previous = tile.swap_transaction(transaction.clone());
            let changed = target.apply(&mut tile);
            tile.swap_transaction(previous);
            break changed;
        };

        if changed {
            let mut state = self.state.lock().await;
            state.status.set_dirty_for_sub_res_flag(index, true)?;
            state.content_changed();
            drop(state);
            self.notify_content_changed(index);
        }
        Ok(changed)
    }
}
