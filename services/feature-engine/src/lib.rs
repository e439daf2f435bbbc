//! Feature Computation Engine for the streaming feature pipeline
//!
//! Consumes interaction events per partition lane, folds them into
//! per-entity aggregates, derives versioned feature vectors, and drives them
//! through the feature store into the serving cache.

pub mod aggregate;
pub mod checkpoint;
pub mod derivation;
pub mod engine;
pub mod error;
pub mod lane;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod validation;

pub use aggregate::AggregateState;
pub use checkpoint::{
    CheckpointPolicy, CheckpointStore, DiskCheckpointStore, LaneCheckpoint, MemoryCheckpointStore,
};
pub use derivation::{Derivation, DerivationRegistry, UserActivity, UserRatingStats};
pub use engine::{ApplyOutcome, EngineConfig, FeatureEngine};
pub use error::EngineError;
pub use lane::{Lane, LaneOutcome};
pub use metrics::PipelineMetrics;
pub use pipeline::{LaneWorker, Pipeline, PipelineConfig, PipelineContext};
pub use retry::{RetryError, RetryPolicy};
