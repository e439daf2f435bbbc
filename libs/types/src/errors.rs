//! Error taxonomy shared across the pipeline
//!
//! Five classes of outcome exist:
//! - transient unavailability (bus, store, cache), retried by the owner of
//!   the retry budget
//! - [`StaleVersion`], a correctness rejection that is never retried
//! - [`ValidationError`], discarded without mutating state
//! - not found, a legitimate terminal answer rather than an error
//! - degraded, a best-effort answer tagged with a [`DegradedReason`]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that may succeed if retried later
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// A commit whose version does not advance the stored version
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("stale version {attempted}: store already holds version {current}")]
pub struct StaleVersion {
    pub attempted: u64,
    pub current: u64,
}

/// Event rejected by the validation gate or by local engine invariants
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("rating {rating} outside [{min}, {max}]")]
    RatingOutOfRange {
        rating: String,
        min: String,
        max: String,
    },

    #[error("rating {0} is not a multiple of 0.5")]
    RatingStep(String),

    #[error("rating only allowed on rate events, got {0}")]
    UnexpectedRating(String),

    #[error("{field} must be non-negative, got {value}")]
    NegativeId { field: &'static str, value: i64 },

    #[error("event_time {event_time} is more than {tolerance_secs}s in the future")]
    TimestampInFuture { event_time: i64, tolerance_secs: i64 },

    #[error("event_time {0} predates the supported range")]
    TimestampTooOld(i64),

    #[error("derivation failed for {feature_set}: {reason}")]
    Derivation { feature_set: String, reason: String },

    #[error("malformed event: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Stable reason code used in rejection counters and HTTP bodies
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::UnknownEventType(_) => "unknown_event_type",
            ValidationError::RatingOutOfRange { .. } => "rating_out_of_range",
            ValidationError::RatingStep(_) => "rating_step",
            ValidationError::UnexpectedRating(_) => "unexpected_rating",
            ValidationError::NegativeId { .. } => "negative_id",
            ValidationError::TimestampInFuture { .. } => "timestamp_in_future",
            ValidationError::TimestampTooOld(_) => "timestamp_too_old",
            ValidationError::Derivation { .. } => "derivation_failed",
            ValidationError::Malformed(_) => "malformed",
        }
    }
}

/// Why a resolve answered with a last-known value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Store read failed after the cache could not answer
    StoreUnavailable,
    /// Both cache and store reported unavailability
    CacheAndStoreUnavailable,
    /// The resolve ceiling elapsed before the store answered
    Timeout,
}

impl DegradedReason {
    pub fn code(&self) -> &'static str {
        match self {
            DegradedReason::StoreUnavailable => "store_unavailable",
            DegradedReason::CacheAndStoreUnavailable => "cache_and_store_unavailable",
            DegradedReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
