//! Object stores that tiles are loaded from and saved back to.
//!
//! The [`TileStore`] trait is the cache's only view of persistent tile data.
//! A store is shared by every cache built on it (typically one per resolution
//! of a pyramid) and must be internally thread-safe.
//!
//! # Example
//!
//! ```ignore
//! use tiled_raster::store::{InMemoryTileStore, TileStore};
//! use tiled_raster::TileGrid;
//!
//! let store = InMemoryTileStore::new("scratch");
//! store.add_resolution(0, TileGrid::new(1024, 1024, 256, 256), [255, 255, 255, 255]);
//! let tile = store.load_tile(5, 0).await?;
//! assert_eq!((tile.pos_x, tile.pos_y), (256, 256));
//! ```

mod memory;

pub use memory::{InMemoryTileStore, PixelFn};

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::grid::TileIndex;

/// Identifies one resolution of a multi-resolution raster.
pub type ResolutionId = u32;

/// Display state a store may depend on when producing tiles.
///
/// Caches do not interpret the context; callers that change it are expected
/// to invalidate the caches built on the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreContext {
    /// Bumped whenever the display state changes
    pub generation: u64,

    /// Optional label of the active layer or view
    pub label: Option<String>,
}

/// A tile as returned by the store.
#[derive(Debug, Clone)]
pub struct LoadedTile {
    pub image: RgbaImage,

    /// Pixel position of the tile's top-left corner in the raster
    pub pos_x: i64,
    pub pos_y: i64,
}

/// Persistent source of tile pixels.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Load one tile of a resolution.
    async fn load_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
    ) -> Result<LoadedTile, StoreError>;

    /// Persist a modified tile.
    async fn save_tile(
        &self,
        index: TileIndex,
        resolution: ResolutionId,
        image: &RgbaImage,
    ) -> Result<(), StoreError>;

    /// Whether the store can back a tiled raster cache at all.
    fn is_compatible(&self) -> bool {
        true
    }

    /// Current display state.
    fn context(&self) -> StoreContext;

    /// Replace the display state.
    fn set_context(&self, context: StoreContext);

    /// Identifier for logging.
    fn identifier(&self) -> &str;
}
