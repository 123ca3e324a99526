//! Raster-wide histogram and palette aggregation.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use super::TiledRasterCache;
use crate::error::RasterError;
use crate::grid::TileIndex;
use crate::stats::{
    scan_stride, Histogram, HistogramOptions, PaletteAccumulator, PaletteParams,
    RepresentativePalette, ScanOutcome, MAX_PALETTE_ENTRIES,
};
use crate::store::TileStore;

impl<S: TileStore + 'static> TiledRasterCache<S> {
    fn edit_epoch(&self) -> u64 {
        self.edits.load(Ordering::Acquire)
    }

    /// Tiles sampled when no region is given: every `stride`-th index.
    fn sampled_tiles(&self, tiles_to_scan_percentage: u8) -> Vec<TileIndex> {
        let stride = scan_stride(tiles_to_scan_percentage) as usize;
        (0..self.grid.tile_count()).step_by(stride).collect()
    }

    /// Merge the raster's histogram into `out`.
    ///
    /// A cached result for the same sampling is reused unless
    /// `force_recompute` is set or a tile was edited since. Tiles that fail to
    /// load are skipped, and a scan that skipped any is not cached. When the
    /// keep-going flag is cleared the scan stops and `out` is left untouched.
    pub async fn compute_histogram(
        &self,
        options: &HistogramOptions,
        out: &mut Histogram,
        force_recompute: bool,
    ) -> Result<ScanOutcome, RasterError> {
        let sampling = &options.sampling;
        let (generation, epoch) = {
            let state = self.state.lock().await;
            let epoch = self.edit_epoch();
            if !force_recompute {
                if let Some((cached_sampling, cached, seen)) = &state.histogram {
                    if cached_sampling == sampling && *seen == epoch {
                        out.add(cached);
                        return Ok(ScanOutcome::Cached);
                    }
                }
            }
            (state.generation, epoch)
        };

        let raster = self.grid.raster_rect();
        let indices: Vec<TileIndex> = match &sampling.region {
            Some(region) => {
                let clipped = region.intersect_rect(&raster);
                match clipped.bounds() {
                    Some(bounds) => self
                        .grid
                        .tiles_in(&bounds)
                        .filter(|index| {
                            self.grid
                                .tile_rect(*index)
                                .is_some_and(|rect| clipped.intersects(&rect))
                        })
                        .collect(),
                    None => Vec::new(),
                }
            }
            None => self.sampled_tiles(sampling.tiles_to_scan_percentage),
        };

        let mut acc = Histogram::rgba(sampling.buckets);
        let mut scanned = 0u64;
        let mut skipped = 0u64;
        for index in indices {
            if !options.should_continue() {
                debug!(scanned, "Histogram scan cancelled");
                return Ok(ScanOutcome::Cancelled {
                    tiles_scanned: scanned,
                });
            }
            let item = match self.get_tile(index).await {
                Ok(item) => item,
                Err(e) if e.is_load_failure() => {
                    warn!(index, error = %e, "Skipping tile in histogram");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let tile = item.read().await;
            acc.add(&tile.histogram(sampling));
            scanned += 1;
        }

        out.add(&acc);

        let mut state = self.state.lock().await;
        if skipped == 0 && state.generation == generation && self.edit_epoch() == epoch {
            state.histogram = Some((sampling.clone(), acc, epoch));
        }
        debug!(
            scanned,
            skipped,
            resolution = self.options.resolution,
            "Histogram computed"
        );
        Ok(ScanOutcome::Completed {
            tiles_scanned: scanned,
        })
    }

    /// Reduced palette representative of the raster's colours.
    ///
    /// If the accumulator cannot be allocated the result is an empty palette.
    /// Like the histogram, a palette is only cached when every sampled tile
    /// loaded, and is dropped once any tile is edited.
    pub async fn representative_palette(
        &self,
        params: &PaletteParams,
    ) -> Result<RepresentativePalette, RasterError> {
        let (generation, epoch) = {
            let state = self.state.lock().await;
            let epoch = self.edit_epoch();
            if let Some((cached_params, cached, seen)) = &state.palette {
                if cached_params == params && *seen == epoch && !cached.is_empty() {
                    return Ok(cached.clone());
                }
            }
            (state.generation, epoch)
        };

        let allocator = self.options.allocator.as_ref();
        let mut acc = match PaletteAccumulator::try_new(allocator, &params.target_palette) {
            Ok(acc) => acc,
            Err(RasterError::OutOfMemory { requested }) => {
                warn!(requested, "Palette accumulator allocation failed");
                return Ok(RepresentativePalette::default());
            }
            Err(e) => return Err(e),
        };

        let mut skipped = 0u64;
        for index in self.sampled_tiles(params.tiles_to_scan_percentage) {
            let item = match self.get_tile(index).await {
                Ok(item) => item,
                Err(e) if e.is_load_failure() => {
                    warn!(index, error = %e, "Skipping tile in palette");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let tile = item.read().await;
            let tile_palette = match tile.representative_palette(MAX_PALETTE_ENTRIES, allocator) {
                Ok(palette) => palette,
                Err(RasterError::OutOfMemory { requested }) => {
                    warn!(requested, index, "Tile palette allocation failed");
                    return Ok(RepresentativePalette::default());
                }
                Err(e) => return Err(e),
            };
            for (color, count) in tile_palette.colors.iter().zip(&tile_palette.counts) {
                let weight = if params.weighted { *count } else { 1 };
                acc.add(*color, weight);
            }
        }

        let palette = acc.finish(params.max_entries);
        if !palette.is_empty() && skipped == 0 {
            let mut state = self.state.lock().await;
            if state.generation == generation && self.edit_epoch() == epoch {
                state.palette = Some((params.clone(), palette.clone(), epoch));
            }
        }
        debug!(
            entries = palette.len(),
            resolution = self.options.resolution,
            "Representative palette computed"
        );
        Ok(palette)
    }
}
