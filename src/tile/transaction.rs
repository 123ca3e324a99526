use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::geometry::Rect;
use crate::grid::TileIndex;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of edit applied to a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Whole tile cleared to the clear colour
    ClearAll,
    /// Pixels inside a shape cleared
    ClearShape,
    /// Pixels under an RLE mask cleared
    ClearRuns,
}

/// One edit recorded by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRecord {
    pub index: TileIndex,
    /// Bounds of the edit in raster coordinates
    pub bounds: Rect,
    pub kind: EditKind,
}

/// A group of edits that belong together.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    edits: Mutex<Vec<EditRecord>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            edits: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record(&self, edit: EditRecord) {
        self.edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(edit);
    }

    /// Snapshot of the recorded edits, in order.
    pub fn edits(&self) -> Vec<EditRecord> {
        self.edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.edits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
