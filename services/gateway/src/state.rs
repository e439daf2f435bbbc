use crate::metrics::GatewayMetrics;
use crate::rate_limit::RateLimiter;
use crate::resolver::FeatureResolver;
use crate::validation::ValidationGate;
use event_bus::EventBus;
use feature_engine::PipelineMetrics;
use feature_store::VersionedStore;
use serving_cache::CacheLayer;
use std::sync::Arc;
use types::time::Clock;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<FeatureResolver>,
    pub gate: Arc<dyn ValidationGate>,
    pub bus: Arc<EventBus>,
    pub store: Arc<VersionedStore>,
    pub cache: Arc<CacheLayer>,
    pub pipeline_metrics: Arc<PipelineMetrics>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<GatewayMetrics>,
    pub clock: Arc<dyn Clock>,
}
