//! Pool-managed wrapper around one resident tile.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::grid::TileIndex;
use crate::pool::{OwnerId, PoolEntry, PoolKey, PoolState};

use super::Tile;

/// Fixed bookkeeping cost charged to the pool for every item.
pub const ITEM_OVERHEAD_BYTES: usize = std::mem::size_of::<TilePoolItem>() + 64;

// =============================================================================
// Owner seam
// =============================================================================

/// The cache that owns an item, as seen from the item and the pool.
///
/// Items and pool entries hold this as a `Weak` back-reference; it is used
/// for lookup only and never keeps a cache alive.
#[async_trait]
pub trait TileOwner: Send + Sync {
    fn owner_id(&self) -> OwnerId;

    /// Evict a tile the pool already dropped from its accounting.
    ///
    /// The caller holds the pool lock.
    async fn evict_pooled(&self, index: TileIndex);

    /// Take the pool and map locks and evict a discardable tile.
    async fn discard_tile(&self, index: TileIndex) -> bool;
}

// =============================================================================
// Membership
// =============================================================================

/// Where an item stands with respect to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Just loaded and not yet handed to the pool; cannot be evicted
    JustLoaded = 0,
    /// Registered with the pool; may be evicted under pressure
    PoolManaged = 1,
    /// Held out of the pool by a caller; never evicted
    Pinned = 2,
    /// Removed from its cache's tile map
    Retired = 3,
}

impl Membership {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Membership::JustLoaded,
            1 => Membership::PoolManaged,
            2 => Membership::Pinned,
            _ => Membership::Retired,
        }
    }
}

// =============================================================================
// TilePoolItem
// =============================================================================

/// A resident tile together with its pool lifecycle state.
pub struct TilePoolItem {
    key: PoolKey,
    tile: RwLock<Tile>,
    membership: AtomicU8,
    image_bytes: AtomicUsize,
    /// 0 until the pool first asks for the size
    cached_size: AtomicUsize,
    invalidated: AtomicBool,
    loss_reported: AtomicBool,
    owner: Weak<dyn TileOwner>,
}

impl TilePoolItem {
    pub(crate) fn new(key: PoolKey, tile: Tile, owner: Weak<dyn TileOwner>) -> Self {
        let image_bytes = tile.byte_size();
        Self {
            key,
            tile: RwLock::new(tile),
            membership: AtomicU8::new(Membership::JustLoaded as u8),
            image_bytes: AtomicUsize::new(image_bytes),
            cached_size: AtomicUsize::new(0),
            invalidated: AtomicBool::new(false),
            loss_reported: AtomicBool::new(false),
            owner,
        }
    }

    pub fn index(&self) -> TileIndex {
        self.key.index
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn membership(&self) -> Membership {
        Membership::from_u8(self.membership.load(Ordering::Acquire))
    }

    fn set_membership(&self, membership: Membership) {
        self.membership.store(membership as u8, Ordering::Release);
    }

    /// Pinned and retired items are never handed to the pool.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self.membership(),
            Membership::JustLoaded | Membership::PoolManaged
        )
    }

    pub fn is_pool_managed(&self) -> bool {
        self.membership() == Membership::PoolManaged
    }

    pub fn is_retired(&self) -> bool {
        self.membership() == Membership::Retired
    }

    /// Shared access to the tile's pixels.
    pub async fn read(&self) -> RwLockReadGuard<'_, Tile> {
        self.tile.read().await
    }

    /// Exclusive access to the tile's pixels.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Tile> {
        self.tile.write().await
    }

    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, Tile>> {
        self.tile.try_read().ok()
    }

    /// Bytes charged to the pool, computing them on first use.
    pub fn cached_size(&self) -> usize {
        match self.cached_size.load(Ordering::Acquire) {
            0 => self.update_cached_size(),
            size => size,
        }
    }

    /// Recompute the pool footprint from the current image size.
    pub fn update_cached_size(&self) -> usize {
        let size = self.image_bytes.load(Ordering::Acquire) + ITEM_OVERHEAD_BYTES;
        self.cached_size.store(size, Ordering::Release);
        size
    }

    /// Register with the pool so the item becomes eligible for eviction.
    pub fn notify_pool(&self, pool: &mut PoolState) {
        if !self.is_discardable() {
            return;
        }
        pool.admit(PoolEntry {
            key: self.key,
            bytes: self.cached_size(),
            owner: self.owner.clone(),
        });
        self.set_membership(Membership::PoolManaged);
    }

    /// Pin (`false`) or unpin (`true`) the item.
    ///
    /// Pinning removes it from the pool; unpinning only makes it eligible
    /// again, the caller decides when to call [`notify_pool`](Self::notify_pool).
    pub fn set_discardable(&self, pool: &mut PoolState, discardable: bool) {
        if self.is_retired() {
            return;
        }
        if discardable {
            if self.membership() == Membership::Pinned {
                self.set_membership(Membership::JustLoaded);
            }
        } else {
            pool.remove(&self.key);
            self.set_membership(Membership::Pinned);
        }
    }

    /// Ask the owning cache to evict this item. Returns false for pinned or
    /// orphaned items.
    pub async fn discard(&self) -> bool {
        if !self.is_discardable() {
            return false;
        }
        match self.owner.upgrade() {
            Some(owner) => owner.discard_tile(self.key.index).await,
            None => false,
        }
    }

    pub fn owner(&self) -> Option<Arc<dyn TileOwner>> {
        self.owner.upgrade()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }

    /// Swap in a freshly loaded tile and clear the invalidated flag.
    pub(crate) async fn replace(&self, tile: Tile) {
        let bytes = tile.byte_size();
        *self.tile.write().await = tile;
        self.image_bytes.store(bytes, Ordering::Release);
        self.cached_size.store(0, Ordering::Release);
        self.invalidated.store(false, Ordering::Release);
        self.loss_reported.store(false, Ordering::Release);
    }

    /// Demote to `JustLoaded` without touching the pool; used while the
    /// owner holds the pool lock and refreshes a stale item.
    pub(crate) fn hold_for_reload(&self, pool: &mut PoolState) {
        pool.remove(&self.key);
        if self.membership() == Membership::PoolManaged {
            self.set_membership(Membership::JustLoaded);
        }
    }

    pub(crate) fn retire(&self) {
        self.set_membership(Membership::Retired);
    }

    /// Claim the one-time "modified tile lost" report. Returns true only the
    /// first time it is called for this item.
    pub(crate) fn claim_loss_report(&self) -> bool {
        !self.loss_reported.swap(true, Ordering::AcqRel)
    }
}

// =============================================================================
// Tests
// =============================================================================
