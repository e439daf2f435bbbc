//! Service wiring: bus → pipeline → store → cache → gateway

use crate::config::ServiceConfig;
use crate::error::StartupError;
use crate::metrics::GatewayMetrics;
use crate::rate_limit::RateLimiter;
use crate::resolver::FeatureResolver;
use crate::router::create_router;
use crate::state::AppState;
use crate::validation::InteractionValidator;
use axum::Router;
use event_bus::{EventBus, TopicConfig, entity_key};
use feature_engine::{
    CheckpointStore, DerivationRegistry, DiskCheckpointStore, FeatureEngine, MemoryCheckpointStore,
    Pipeline, PipelineContext, PipelineMetrics,
};
use feature_store::{StoreConfig, VersionedStore};
use serving_cache::{CacheLayer, FeatureCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::time::{Clock, SystemClock};

pub struct App {
    state: AppState,
    pipeline: Pipeline,
    compaction: Option<JoinHandle<()>>,
}

impl App {
    /// Open durable state, recover every lane and start ingestion.
    /// Must be called inside a tokio runtime.
    pub fn start(config: ServiceConfig) -> Result<Self, StartupError> {
        Self::start_with_clock(config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StartupError> {
        if config.partitions == 0 {
            return Err(StartupError::Config("partitions must be at least 1".into()));
        }

        let topic = match &config.data_dir {
            Some(dir) => TopicConfig::durable(config.partitions, dir.join("bus")),
            None => TopicConfig::in_memory(config.partitions),
        };
        let bus = Arc::new(EventBus::open_with(topic, entity_key(), clock.clone())?);

        let store_config = match &config.data_dir {
            Some(dir) => StoreConfig::durable(dir.join("store")),
            None => StoreConfig::default(),
        };
        let store = Arc::new(VersionedStore::open_with_clock(store_config, clock.clone())?);

        let cache = Arc::new(CacheLayer::start(config.cache.clone(), clock.clone()));

        let checkpoints: Arc<dyn CheckpointStore> = match &config.data_dir {
            Some(dir) => Arc::new(DiskCheckpointStore::new(
                dir.join("checkpoints"),
                &config.pipeline.checkpoint,
            )),
            None => Arc::new(MemoryCheckpointStore::new()),
        };

        let engine = Arc::new(FeatureEngine::with_clock(
            config.engine.clone(),
            DerivationRegistry::with_defaults(),
            clock.clone(),
        ));
        let pipeline_metrics = Arc::new(PipelineMetrics::new());
        let ctx = PipelineContext {
            store: store.clone(),
            cache: cache.clone(),
            checkpoints,
            metrics: pipeline_metrics.clone(),
            clock: clock.clone(),
            config: config.pipeline.clone(),
        };
        let pipeline = Pipeline::spawn(&bus, engine, ctx)?;

        let metrics = Arc::new(GatewayMetrics::new());
        let cache_seam: Arc<dyn FeatureCache> = cache.clone();
        let resolver = Arc::new(FeatureResolver::with_clock(
            store.clone(),
            cache_seam,
            config.resolver.clone(),
            metrics.clone(),
            clock.clone(),
        ));

        let compaction = config
            .data_dir
            .as_ref()
            .map(|_| spawn_compaction(store.clone(), config.compact_interval));

        let state = AppState {
            resolver,
            gate: Arc::new(InteractionValidator::default()),
            bus,
            store,
            cache,
            pipeline_metrics,
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_refill,
            )),
            metrics,
            clock,
        };

        info!(
            partitions = config.partitions,
            durable = config.data_dir.is_some(),
            "feature service started"
        );
        Ok(Self {
            state,
            pipeline,
            compaction,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Stop ingestion after final lane checkpoints and flush the bus
    pub async fn shutdown(self) -> Result<(), StartupError> {
        if let Some(task) = self.compaction {
            task.abort();
        }
        self.pipeline.shutdown().await?;
        self.state.bus.sync()?;
        info!("feature service stopped");
        Ok(())
    }
}

/// Periodically fold the store WAL into a snapshot
fn spawn_compaction(store: Arc<VersionedStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.compact()).await {
                Ok(Ok(covered)) => debug!(covered, "periodic compaction finished"),
                Ok(Err(e)) => warn!(error = %e, "periodic compaction failed"),
                Err(e) => warn!(error = %e, "compaction task panicked"),
            }
        }
    })
}
