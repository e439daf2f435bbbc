//! Cache counters

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub propagated: AtomicU64,
    pub ignored_stale: AtomicU64,
    pub filled: AtomicU64,
    pub lag_violations: AtomicU64,
    pub dropped: AtomicU64,
    pub overflowed: AtomicU64,
    pub max_lag_ns: AtomicI64,
}

impl CacheCounters {
    pub fn record_lag(&self, lag_ns: i64) {
        self.max_lag_ns.fetch_max(lag_ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            propagated: self.propagated.load(Ordering::Relaxed),
            ignored_stale: self.ignored_stale.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            lag_violations: self.lag_violations.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            max_lag_ns: self.max_lag_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Records applied from the propagation channel
    pub propagated: u64,
    /// Propagations or fills older than the cached version
    pub ignored_stale: u64,
    /// Read-through fills from the gateway
    pub filled: u64,
    /// Propagations that became visible later than the staleness budget
    pub lag_violations: u64,
    /// Propagations lost: channel closed, queue full or apply failed
    pub dropped: u64,
    /// Subset of `dropped` rejected by a full propagation queue
    pub overflowed: u64,
    pub max_lag_ns: i64,
}

impl CacheStats {
    /// Hit rate in [0.0, 1.0]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        assert_eq!(counters.snapshot(0).hit_rate(), 0.0);
        counters.hits.fetch_add(3, Ordering::Relaxed);
        counters.misses.fetch_add(1, Ordering::Relaxed);
        assert_eq!(counters.snapshot(0).hit_rate(), 0.75);
    }

    #[test]
    fn test_max_lag_only_grows() {
        let counters = CacheCounters::default();
        counters.record_lag(50);
        counters.record_lag(10);
        assert_eq!(counters.snapshot(0).max_lag_ns, 50);
    }
}
