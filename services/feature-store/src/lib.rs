//! Feature Store for the streaming feature pipeline
//!
//! Versioned key-value store mapping (entity_id, feature_set_id) to feature
//! vectors. Commits are atomic compare-and-set on version; reads serve the
//! latest record, an exact version, or the record current at a timestamp.

pub mod error;
pub mod history;
pub mod store;
pub mod versioned;

pub use error::StoreError;
pub use store::{CommitOutcome, FeatureStore};
pub use versioned::{StoreConfig, StoreStats, VersionedStore};
