//! Cache contract used by the ingestion pipeline and the gateway

use crate::cache::ServingCache;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::propagator::Propagator;
use crate::stats::CacheStats;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use types::ids::FeatureKey;
use types::record::{CacheEntry, StoreRecord};
use types::time::Clock;

/// Read replica of the feature store
#[async_trait]
pub trait FeatureCache: Send + Sync {
    async fn get(&self, key: &FeatureKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Fire-and-forget replication of a committed record
    fn propagate(&self, record: StoreRecord);

    /// Read-through fill with a record the caller just read from the store
    async fn fill(&self, record: StoreRecord) -> Result<(), CacheError>;
}

/// [`ServingCache`] plus its propagation task
pub struct CacheLayer {
    cache: Arc<ServingCache>,
    propagator: Propagator,
    task: JoinHandle<()>,
}

impl CacheLayer {
    /// Build the cache and spawn propagation on the current runtime
    pub fn start(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(ServingCache::with_clock(config, clock));
        let (propagator, task) = Propagator::spawn(cache.clone());
        Self {
            cache,
            propagator,
            task,
        }
    }

    pub fn cache(&self) -> &Arc<ServingCache> {
        &self.cache
    }

    pub fn propagator(&self) -> Propagator {
        self.propagator.clone()
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn set_available(&self, available: bool) {
        self.cache.set_available(available);
    }
}

impl Drop for CacheLayer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl FeatureCache for CacheLayer {
    async fn get(&self, key: &FeatureKey) -> Result<Option<CacheEntry>, CacheError> {
        self.cache.lookup(key).await
    }

    fn propagate(&self, record: StoreRecord) {
        self.propagator.propagate(record);
    }

    async fn fill(&self, record: StoreRecord) -> Result<(), CacheError> {
        self.cache.fill(record).await.map(|_| ())
    }
}
