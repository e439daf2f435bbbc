//! LRU replica of committed store records
//!
//! Entries are spread over independently locked LRU shards by key hash. A
//! shard lock is only held for the in-memory map operation, never across an
//! await, so a propagation into one shard never stalls lookups in another.

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::stats::{CacheCounters, CacheStats};
use lru::LruCache;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use types::ids::FeatureKey;
use types::record::{CacheEntry, StoreRecord};
use types::time::{Clock, SystemClock};

type Shard = Mutex<LruCache<FeatureKey, CacheEntry>>;

/// Result of applying a record to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record is now the cached entry for its key
    Stored(CacheEntry),
    /// The cache already held this version or a newer one
    IgnoredStale { cached: u64 },
}

/// Capacity-bounded read replica of the feature store
///
/// Entries only move forward in version. Evictions drop the entry and never
/// touch the store. Recency is tracked per shard.
pub struct ServingCache {
    shards: Vec<Shard>,
    hasher: RandomState,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    counters: Arc<CacheCounters>,
    available: AtomicBool,
}

impl ServingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.capacity.max(1);
        let shard_count = config.shards.clamp(1, capacity);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            config,
            clock,
            counters: Arc::new(CacheCounters::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn counters(&self) -> &Arc<CacheCounters> {
        &self.counters
    }

    fn shard_index(&self, key: &FeatureKey) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &FeatureKey) -> MutexGuard<'_, LruCache<FeatureKey, CacheEntry>> {
        // Shard operations cannot leave the map half-updated
        self.shards[self.shard_index(key)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the cached entry for `key`, promoting it in LRU order
    pub async fn lookup(&self, key: &FeatureKey) -> Result<Option<CacheEntry>, CacheError> {
        self.ensure_available()?;
        let cached = self.shard(key).get(key).cloned();
        match cached {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Install `record` unless the cache already holds the same or a newer
    /// version of its key
    pub async fn apply(&self, record: StoreRecord) -> Result<ApplyOutcome, CacheError> {
        self.ensure_available()?;
        let key = record.key();
        let offered = record.version();
        let mut shard = self.shard(&key);

        if let Some(cached) = shard.peek(&key).map(CacheEntry::version) {
            if cached >= offered {
                drop(shard);
                self.counters.ignored_stale.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, cached, offered, "ignoring stale cache update");
                return Ok(ApplyOutcome::IgnoredStale { cached });
            }
        }

        let entry = CacheEntry::new(record, self.clock.now_nanos());
        let evicted = shard
            .push(key.clone(), entry.clone())
            .map(|(evicted, _)| evicted)
            .filter(|evicted| *evicted != key);
        drop(shard);

        if let Some(evicted) = evicted {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(evicted = %evicted, "evicted least recently used entry");
        }
        Ok(ApplyOutcome::Stored(entry))
    }

    /// Read-through fill with a record just read from the store
    pub async fn fill(&self, record: StoreRecord) -> Result<ApplyOutcome, CacheError> {
        let outcome = self.apply(record).await?;
        if matches!(outcome, ApplyOutcome::Stored(_)) {
            self.counters.filled.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// Drop the entry for `key`, if any
    pub async fn invalidate(&self, key: &FeatureKey) -> Option<CacheEntry> {
        self.shard(key).pop(key)
    }

    pub async fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Simulate the cache becoming unreachable (or recovering). While
    /// unavailable every lookup and apply fails with
    /// [`CacheError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        if self.available.swap(available, Ordering::SeqCst) != available {
            warn!(available, "serving cache availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.len().await;
        self.counters.snapshot(entries)
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::Unavailable("serving cache unreachable".into()))
        }
    }
}
