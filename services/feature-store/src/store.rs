//! Feature store contract

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use types::errors::StaleVersion;
use types::feature::FeatureVector;
use types::ids::FeatureKey;
use types::record::StoreRecord;

/// Result of a compare-and-set commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// The record is now the latest for its key
    Committed(StoreRecord),
    /// The version did not advance the stored one; discard, never retry
    Rejected(StaleVersion),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }

    /// Version that was committed, if any
    pub fn committed_version(&self) -> Option<u64> {
        match self {
            CommitOutcome::Committed(record) => Some(record.version()),
            CommitOutcome::Rejected(_) => None,
        }
    }
}

/// Authoritative, versioned store of feature vectors keyed by
/// (entity_id, feature_set_id).
///
/// Visible state never regresses: a commit succeeds only when its version is
/// strictly greater than the stored one, atomically per key.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn commit(&self, vector: FeatureVector) -> Result<CommitOutcome, StoreError>;

    async fn read_latest(&self, key: &FeatureKey) -> Result<Option<StoreRecord>, StoreError>;

    /// Exactly the record committed at `version`
    async fn read_as_of(
        &self,
        key: &FeatureKey,
        version: u64,
    ) -> Result<Option<StoreRecord>, StoreError>;

    /// Latest record whose `computed_at` is at or before `timestamp`
    async fn read_at(
        &self,
        key: &FeatureKey,
        timestamp: i64,
    ) -> Result<Option<StoreRecord>, StoreError>;
}
