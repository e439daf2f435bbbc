//! Store records and cache entries

use crate::feature::FeatureVector;
use crate::ids::FeatureKey;
use serde::{Deserialize, Serialize};

/// Authoritative persisted form of a feature vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub vector: FeatureVector,
    /// Unix nanoseconds when the store accepted the commit
    pub committed_at: i64,
}

impl StoreRecord {
    pub fn new(vector: FeatureVector, committed_at: i64) -> Self {
        Self {
            vector,
            committed_at,
        }
    }

    pub fn key(&self) -> FeatureKey {
        self.vector.key()
    }

    pub fn version(&self) -> u64 {
        self.vector.version
    }
}

/// Replica of a store record held by the serving cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: StoreRecord,
    /// Unix nanoseconds when the record became visible in the cache
    pub propagated_at: i64,
}

impl CacheEntry {
    pub fn new(record: StoreRecord, propagated_at: i64) -> Self {
        Self {
            record,
            propagated_at,
        }
    }

    pub fn version(&self) -> u64 {
        self.record.version()
    }

    pub fn vector(&self) -> &FeatureVector {
        &self.record.vector
    }

    /// Nanoseconds between the store commit and cache visibility
    pub fn propagation_lag(&self) -> i64 {
        (self.propagated_at - self.record.committed_at).max(0)
    }

    /// Nanoseconds since the underlying record was committed
    pub fn age(&self, now: i64) -> i64 {
        (now - self.record.committed_at).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{FeatureValues, Timeliness};
    use crate::ids::{EntityId, FeatureSetId};

    fn record(committed_at: i64) -> StoreRecord {
        StoreRecord::new(
            FeatureVector::new(
                EntityId::new("u1"),
                FeatureSetId::new("fs"),
                FeatureValues::new(),
                3,
                committed_at - 10,
                Timeliness::OnTime,
            ),
            committed_at,
        )
    }

    #[test]
    fn test_cache_entry_lag_and_age() {
        let entry = CacheEntry::new(record(1_000), 1_250);
        assert_eq!(entry.version(), 3);
        assert_eq!(entry.propagation_lag(), 250);
        assert_eq!(entry.age(2_000), 1_000);
    }

    #[test]
    fn test_lag_never_negative() {
        let entry = CacheEntry::new(record(1_000), 900);
        assert_eq!(entry.propagation_lag(), 0);
        assert_eq!(entry.age(500), 0);
    }
}
