//! Feature Retrieval Gateway
//!
//! Synchronous read path for the prediction consumer plus the HTTP ingest
//! gate in front of the event bus. `App` wires the whole pipeline into one
//! process.

pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod resolver;
pub mod router;
pub mod state;
pub mod validation;

pub use app::App;
pub use config::ServiceConfig;
pub use error::{GatewayError, StartupError};
pub use metrics::GatewayMetrics;
pub use resolver::{FeatureResolver, Resolution, ResolverConfig, Source};
pub use validation::{IngestRequest, InteractionValidator, ValidationGate};
