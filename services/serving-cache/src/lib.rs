//! Serving cache for the streaming feature pipeline
//!
//! Capacity-bounded LRU replica of the feature store. Committed records
//! arrive through a background propagation task; the cache never exposes a
//! version newer than the store's and never moves an entry backwards.

pub mod cache;
pub mod config;
pub mod error;
pub mod layer;
pub mod propagator;
pub mod stats;

pub use cache::{ApplyOutcome, ServingCache};
pub use config::CacheConfig;
pub use error::CacheError;
pub use layer::{CacheLayer, FeatureCache};
pub use propagator::Propagator;
pub use stats::CacheStats;
