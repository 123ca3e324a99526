//! Shared memory pool bounding the bytes held by resident tiles.
//!
//! The pool does not own tiles. It tracks which pool-managed tiles are
//! resident, how many bytes they account for, and in which order they were
//! used. When an admission hint says more memory is about to be needed, it
//! hands back least-recently-used victims for their owning caches to evict.
//!
//! # Locking
//!
//! [`MemoryPool::lock`] returns the pool-wide guard. Caches take it *before*
//! their own tile-map lock whenever a load might evict, so the pool can never
//! evict a tile that another task is in the middle of loading.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::grid::TileIndex;
use crate::tile::TileOwner;

/// Default pool budget: 256MB
pub const DEFAULT_POOL_BUDGET: usize = 256 * 1024 * 1024;

/// Identifies one cache registered with a pool.
pub type OwnerId = u64;

// =============================================================================
// Configuration
// =============================================================================

/// What happens to a modified tile chosen for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Write the tile back to its store before dropping it
    #[default]
    SaveDirty,
    /// Drop the tile and report the modification as lost
    DiscardDirty,
}

/// Pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum bytes of pool-managed tiles
    pub budget_bytes: usize,

    /// Handling of modified victims
    pub policy: EvictionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_POOL_BUDGET,
            policy: EvictionPolicy::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Key of a pool entry: the owning cache plus the tile index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub owner: OwnerId,
    pub index: TileIndex,
}

/// Accounting record for one pool-managed tile.
#[derive(Clone)]
pub struct PoolEntry {
    pub key: PoolKey,
    pub bytes: usize,
    pub owner: Weak<dyn TileOwner>,
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("key", &self.key)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub admissions: u64,
    pub admission_hints: u64,
    pub victims: u64,
    pub peak_bytes: usize,
}

// =============================================================================
// Pool state
// =============================================================================

/// State behind the pool lock.
pub struct PoolState {
    lru: LruCache<PoolKey, PoolEntry>,
    used: usize,
    budget: usize,
    policy: EvictionPolicy,
    stats: PoolStats,
}

impl PoolState {
    fn new(config: PoolConfig) -> Self {
        Self {
            lru: LruCache::unbounded(),
            used: 0,
            budget: config.budget_bytes,
            policy: config.policy,
            stats: PoolStats::default(),
        }
    }

    /// Register (or refresh) a pool-managed tile as most recently used.
    pub fn admit(&mut self, entry: PoolEntry) {
        let bytes = entry.bytes;
        if let Some(old) = self.lru.put(entry.key, entry) {
            self.used = self.used.saturating_sub(old.bytes);
        }
        self.used += bytes;
        self.stats.admissions += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.used);
    }

    /// Stop managing a tile.
    pub fn remove(&mut self, key: &PoolKey) -> Option<PoolEntry> {
        let entry = self.lru.pop(key)?;
        self.used = self.used.saturating_sub(entry.bytes);
        Some(entry)
    }

    /// Mark a tile as recently used.
    pub fn touch(&mut self, key: &PoolKey) {
        self.lru.get(key);
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.lru.contains(key)
    }

    /// Admission hint: `tile_bytes + object_bytes` are about to be loaded.
    ///
    /// Returns the least-recently-used entries that must be evicted for the
    /// new tile to fit. They are already removed from the pool's accounting;
    /// the caller is responsible for evicting them from their caches.
    pub fn need_memory(&mut self, tile_bytes: usize, object_bytes: usize) -> Vec<PoolEntry> {
        self.stats.admission_hints += 1;
        let incoming = tile_bytes + object_bytes;
        let mut victims = Vec::new();
        while self.used + incoming > self.budget {
            let Some((_, entry)) = self.lru.pop_lru() else {
                break;
            };
            self.used = self.used.saturating_sub(entry.bytes);
            victims.push(entry);
        }
        if !victims.is_empty() {
            self.stats.victims += victims.len() as u64;
            debug!(
                victims = victims.len(),
                incoming,
                used = self.used,
                budget = self.budget,
                "Pool selected eviction victims"
            );
        }
        victims
    }

    /// Drop every entry belonging to `owner`.
    pub fn remove_owner(&mut self, owner: OwnerId) -> usize {
        let keys: Vec<PoolKey> = self
            .lru
            .iter()
            .filter(|(k, _)| k.owner == owner)
            .map(|(k, _)| *k)
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

// =============================================================================
// Memory pool
// =============================================================================

/// A memory pool shared by any number of tiled raster caches.
pub struct MemoryPool {
    state: Mutex<PoolState>,
    policy: EvictionPolicy,
    next_owner: AtomicU64,
}

impl MemoryPool {
    /// Create a pool with the default budget (256MB).
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::new(config)),
            policy: config.policy,
            next_owner: AtomicU64::new(1),
        }
    }

    /// Acquire the pool-wide lock.
    pub async fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().await
    }

    /// Acquire the pool-wide lock without waiting.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, PoolState>> {
        self.state.try_lock().ok()
    }

    /// Eviction policy; fixed for the pool's lifetime, readable without the lock.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Allocate an id for a new cache.
    pub fn register_owner(&self) -> OwnerId {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn used_bytes(&self) -> usize {
        self.state.lock().await.used_bytes()
    }

    pub async fn stats(&self) -> PoolStats {
        self.state.lock().await.stats()
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
