use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgba, RgbaImage};
use tracing::debug;

use super::{LoadedTile, ResolutionId, StoreContext, TileStore};
use crate::error::StoreError;
use crate::grid::{TileGrid, TileIndex};

/// Colour of the raster pixel at `(x, y)`, used to synthesise unwritten tiles.
pub type PixelFn = Arc<dyn Fn(i64, i64) -> Rgba<u8> + Send + Sync>;

struct Layer {
    grid: TileGrid,
    pixels: PixelFn,
}

/// Thread-safe in-memory store.
///
/// Saved tiles are kept as raw RGBA bytes keyed by `(resolution, index)`.
/// Tiles that were never saved are synthesised from the resolution's pixel
/// function, so a freshly created store behaves like a raster with known
/// content. Loads and saves are counted for inspection.
pub struct InMemoryTileStore {
    identifier: String,
    layers: RwLock<HashMap<ResolutionId, Layer>>,
    tiles: RwLock<HashMap<(ResolutionId, TileIndex), Bytes>>,
    context: RwLock<StoreContext>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl InMemoryTileStore {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            layers: RwLock::new(HashMap::new()),
            tiles: RwLock::new(HashMap::new()),
            context: RwLock::new(StoreContext::default()),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }

    /// Register a resolution whose unwritten tiles are a solid colour.
    pub fn add_resolution(&self, resolution: ResolutionId, grid: TileGrid, fill: [u8; 4]) {
        let color = Rgba(fill);
        self.add_resolution_with(resolution, grid, Arc::new(move |_, _| color));
    }

    /// Register a resolution whose unwritten tiles are drawn by `pixels`.
    pub fn add_resolution_with(&self, resolution: ResolutionId, grid: TileGrid, pixels: PixelFn) {
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resolution, Layer { grid, pixels });
    }

    /// Store raw RGBA bytes for a tile, bypassing the save counter.
    pub fn put_raw(&self, resolution: ResolutionId, index: TileIndex, data: Bytes) {
        self.tiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((resolution, index), data);
    }

    /// Whether a tile has been written (as opposed to synthesised).
    pub fn contains(&self, resolution: ResolutionId, index: TileIndex) -> bool {
        self.tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(resolution, index))
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.loads.store(0, Ordering::SeqCst);
        self.saves.store(0, Ordering::SeqCst);
    }

    fn geometry(
        &self,
        resolution: ResolutionId,
        index: TileIndex,
    ) -> Result<(TileGrid, PixelFn, (i64, i64), (u32, u32)), StoreError> {
        let layers = self.layers.read().unwrap_or_else(PoisonError::into_inner);
        let layer = layers.get(&resolution).ok_or_else(|| {
            StoreError::NotFound(format!("{}: no resolution {}", self.identifier, resolution))
        })?;
        let grid = layer.grid;
        let position = grid.position_of(index).ok_or_else(|| {
            StoreError::NotFound(format!(
                "{}: tile {} not in resolution {}",
                self.identifier, index, resolution
            ))
        })?;
        let size = grid.tile_data_size(index).ok_or_else(|| {
            StoreError::Corrupted(format!("{}: tile {} has no data", self.identifier, index))
        })?;
        Ok((grid, layer.pixels.clone(), position, size))
    }
}

impl fmt::Debug for InMemoryTileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTileStore")
            .field("identifier", &self.identifier)
            .field("loads", &self.load_count())
            .field("saves", &self.save_count())
            .finish()
    }
}

#[async_trait]
impl TileStore for InMemoryTileStore {
    async fn load_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
    ) -> Result<LoadedTile, StoreError> {
        let (_, pixels, (pos_x, pos_y), (width, height)) = self.geometry(resolution, index)?;
        self.loads.fetch_add(1, Ordering::SeqCst);

        let stored = self
            .tiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(resolution, index))
            .cloned();

        let image = match stored {
            Some(data) => {
                let expected = width as usize * height as usize * 4;
                if data.len() != expected {
                    return Err(StoreError::Corrupted(format!(
                        "tile {} holds {} bytes, expected {}",
                        index,
                        data.len(),
                        expected
                    )));
                }
                RgbaImage::from_raw(width, height, data.to_vec()).ok_or_else(|| {
                    StoreError::Corrupted(format!("tile {} has an invalid buffer", index))
                })?
            }
            None => RgbaImage::from_fn(width, height, |x, y| {
                pixels(pos_x + x as i64, pos_y + y as i64)
            }),
        };

        debug!(
            store = %self.identifier,
            resolution,
            index,
            width,
            height,
            "Loaded tile"
        );
        Ok(LoadedTile {
            image,
            pos_x,
            pos_y,
        })
    }

    async fn save_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
        image: &RgbaImage,
    ) -> Result<(), StoreError> {
        let (_, _, _, (width, height)) = self.geometry(resolution, index)?;
        if image.width() < width || image.height() < height {
            return Err(StoreError::Unsupported(format!(
                "tile {} is {}x{}, store expects {}x{}",
                index,
                image.width(),
                image.height(),
                width,
                height
            )));
        }

        // Persist only the part of the tile that lies inside the raster.
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&image.get_pixel(x, y).0);
            }
        }

        self.put_raw(resolution, index, Bytes::from(data));
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!(store = %self.identifier, resolution, index, "Saved tile");
        Ok(())
    }

    fn context(&self) -> StoreContext {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_context(&self, context: StoreContext) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = context;
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
