//! Types library for the streaming feature pipeline
//!
//! Shared data model for every service: interaction events, feature
//! vectors, store records, cache entries, freshness policies and the error
//! taxonomy. Types here carry no behaviour beyond construction and
//! inspection; the services own the algorithms.
//!
//! # Modules
//! - `ids`: Identifiers (EventId, EntityId, FeatureSetId, FeatureKey)
//! - `event`: Raw interaction events
//! - `feature`: Derived feature vectors
//! - `record`: Store records and cache entries
//! - `policy`: Freshness policies
//! - `errors`: Error taxonomy
//! - `time`: Clock abstraction

pub mod errors;
pub mod event;
pub mod feature;
pub mod ids;
pub mod policy;
pub mod record;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::event::*;
    pub use crate::feature::*;
    pub use crate::ids::*;
    pub use crate::policy::*;
    pub use crate::record::*;
    pub use crate::time::{Clock, ManualClock, SystemClock};
    pub use rust_decimal::Decimal;
}
