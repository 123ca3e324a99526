use thiserror::Error;

use crate::grid::TileIndex;

/// Errors raised by a tile store while loading or saving a tile
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store has no record for the requested tile
    #[error("Tile not found: {0}")]
    NotFound(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be decoded into a tile image
    #[error("Corrupted tile data: {0}")]
    Corrupted(String),

    /// The store cannot serve this request (incompatible layout, wrong resolution, ...)
    #[error("Unsupported store operation: {0}")]
    Unsupported(String),
}

/// Errors surfaced by the tiled raster cache
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// Tile index is not below the raster's tile count
    #[error("Tile index {index} out of range (tile count is {tile_count})")]
    OutOfRange { index: TileIndex, tile_count: u64 },

    /// The store could not supply a tile
    #[error("Failed to load tile {index}: {source}")]
    LoadFailed {
        index: TileIndex,
        #[source]
        source: StoreError,
    },

    /// The store rejected a modified tile
    #[error("Failed to save tile {index}: {source}")]
    SaveFailed {
        index: TileIndex,
        #[source]
        source: StoreError,
    },

    /// A temporary buffer or accumulator could not be allocated
    #[error("Out of memory: could not allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The requested operation is not implemented by this cache
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// An internal invariant was broken; this is a defect, not a recoverable condition
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A transform with a zero, negative or non-finite scale was supplied
    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    /// Cache options are inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Encoding a canvas for export failed
    #[error("Encode error: {message}")]
    Encode { message: String },
}

impl RasterError {
    /// Returns true if this error came from the tile store.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, RasterError::LoadFailed { .. })
    }
}
