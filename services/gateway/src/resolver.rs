//! Feature resolution for the prediction path
//!
//! BEST_EFFORT reads the serving cache and falls back to the store on a
//! miss; STRICT reads the store only. Every call runs under a hard ceiling.
//! When the ceiling elapses or the backing services are unreachable, the
//! last vector this resolver served for the key is returned as `Degraded`.

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use feature_store::FeatureStore;
use lru::LruCache;
use serde::Serialize;
use serving_cache::FeatureCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use types::errors::DegradedReason;
use types::feature::FeatureVector;
use types::ids::FeatureKey;
use types::policy::FreshnessPolicy;
use types::record::StoreRecord;
use types::time::{Clock, SystemClock};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Ceiling on a whole resolve call
    pub resolve_timeout: Duration,
    /// Keys remembered for degraded answers
    pub last_known_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_millis(50),
            last_known_capacity: 10_000,
        }
    }
}

/// Where a fresh answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cache,
    Store,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        vector: FeatureVector,
        source: Source,
    },
    /// The entity has no recorded history for the feature set
    NotFound,
    /// Last-known vector served because the live path failed
    Degraded {
        vector: FeatureVector,
        /// Age of the vector's store commit when it was served
        staleness: Duration,
        reason: DegradedReason,
    },
}

impl Resolution {
    pub fn vector(&self) -> Option<&FeatureVector> {
        match self {
            Resolution::Found { vector, .. } | Resolution::Degraded { vector, .. } => Some(vector),
            Resolution::NotFound => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Resolution::Degraded { .. })
    }
}

/// Result of the live lookup, before degradation is considered
enum Lookup {
    Found(StoreRecord, Source),
    Missing,
}

pub struct FeatureResolver {
    store: Arc<dyn FeatureStore>,
    cache: Arc<dyn FeatureCache>,
    last_known: Mutex<LruCache<FeatureKey, StoreRecord>>,
    config: ResolverConfig,
    metrics: Arc<GatewayMetrics>,
    clock: Arc<dyn Clock>,
}

impl FeatureResolver {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        cache: Arc<dyn FeatureCache>,
        config: ResolverConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self::with_clock(store, cache, config, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn FeatureStore>,
        cache: Arc<dyn FeatureCache>,
        config: ResolverConfig,
        metrics: Arc<GatewayMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.last_known_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache,
            last_known: Mutex::new(LruCache::new(capacity)),
            config,
            metrics,
            clock,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Resolve the current vector for `key` under `policy`
    pub async fn resolve(
        &self,
        key: &FeatureKey,
        policy: FreshnessPolicy,
    ) -> Result<Resolution, GatewayError> {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.config.resolve_timeout, self.lookup(key, policy))
            .await
        {
            Ok(Ok(Lookup::Found(record, source))) => {
                self.metrics
                    .record_staleness(self.clock.now_nanos() - record.committed_at);
                self.remember(&record);
                Ok(Resolution::Found {
                    vector: record.vector,
                    source,
                })
            }
            Ok(Ok(Lookup::Missing)) => {
                GatewayMetrics::incr(&self.metrics.not_found);
                Ok(Resolution::NotFound)
            }
            Ok(Err(reason)) => self.degrade(key, reason),
            Err(_) => {
                GatewayMetrics::incr(&self.metrics.timeouts);
                warn!(
                    key = %key,
                    timeout_ms = self.config.resolve_timeout.as_millis() as u64,
                    "resolve exceeded its ceiling"
                );
                self.degrade(key, DegradedReason::Timeout)
            }
        };

        self.metrics
            .record_resolve(started.elapsed().as_nanos() as u64);
        result
    }

    /// Exactly the record committed at `version`; never degraded
    pub async fn resolve_as_of(
        &self,
        key: &FeatureKey,
        version: u64,
    ) -> Result<Option<StoreRecord>, GatewayError> {
        match tokio::time::timeout(
            self.config.resolve_timeout,
            self.store.read_as_of(key, version),
        )
        .await
        {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => {
                GatewayMetrics::incr(&self.metrics.store_errors);
                Err(GatewayError::Unavailable(e.to_string()))
            }
            Err(_) => {
                GatewayMetrics::incr(&self.metrics.timeouts);
                Err(GatewayError::Unavailable(format!(
                    "{key}@{version}: point-in-time read timed out"
                )))
            }
        }
    }

    async fn lookup(
        &self,
        key: &FeatureKey,
        policy: FreshnessPolicy,
    ) -> Result<Lookup, DegradedReason> {
        let mut cache_failed = false;

        if policy.uses_cache() {
            match self.cache.get(key).await {
                Ok(Some(entry)) => {
                    GatewayMetrics::incr(&self.metrics.cache_hits);
                    return Ok(Lookup::Found(entry.record, Source::Cache));
                }
                Ok(None) => GatewayMetrics::incr(&self.metrics.cache_misses),
                Err(e) => {
                    GatewayMetrics::incr(&self.metrics.cache_errors);
                    cache_failed = true;
                    debug!(key = %key, error = %e, "cache read failed, falling back to store");
                }
            }
        }

        GatewayMetrics::incr(&self.metrics.store_reads);
        match self.store.read_latest(key).await {
            Ok(Some(record)) => {
                if policy.uses_cache() && !cache_failed {
                    if let Err(e) = self.cache.fill(record.clone()).await {
                        debug!(key = %key, error = %e, "read-through fill failed");
                    }
                }
                Ok(Lookup::Found(record, Source::Store))
            }
            Ok(None) => Ok(Lookup::Missing),
            Err(e) => {
                GatewayMetrics::incr(&self.metrics.store_errors);
                warn!(key = %key, error = %e, policy = %policy, "store read failed");
                Err(if cache_failed {
                    DegradedReason::CacheAndStoreUnavailable
                } else {
                    DegradedReason::StoreUnavailable
                })
            }
        }
    }

    fn degrade(&self, key: &FeatureKey, reason: DegradedReason) -> Result<Resolution, GatewayError> {
        let last = self
            .last_known
            .lock()
            .ok()
            .and_then(|mut last_known| last_known.get(key).cloned());

        match last {
            Some(record) => {
                let age_ns = (self.clock.now_nanos() - record.committed_at).max(0);
                GatewayMetrics::incr(&self.metrics.degraded);
                self.metrics.record_staleness(age_ns);
                warn!(
                    key = %key,
                    version = record.version(),
                    reason = %reason,
                    staleness_ms = age_ns / 1_000_000,
                    "serving last-known vector"
                );
                Ok(Resolution::Degraded {
                    vector: record.vector,
                    staleness: Duration::from_nanos(age_ns as u64),
                    reason,
                })
            }
            None => {
                GatewayMetrics::incr(&self.metrics.unavailable);
                Err(GatewayError::Unavailable(format!("{key}: {reason}")))
            }
        }
    }

    /// Keep the newest record served for the key
    fn remember(&self, record: &StoreRecord) {
        let Ok(mut last_known) = self.last_known.lock() else {
            return;
        };
        let key = record.key();
        let newer = last_known
            .peek(&key)
            .is_none_or(|known| known.version() <= record.version());
        if newer {
            last_known.put(key, record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_store::VersionedStore;
    use serving_cache::{CacheConfig, CacheLayer};
    use types::feature::{FeatureValues, Timeliness};
    use types::ids::{EntityId, FeatureSetId};
    use types::time::ManualClock;

    fn vector(version: u64) -> FeatureVector {
        FeatureVector::new(
            EntityId::new("u1"),
            FeatureSetId::new("user_rating_stats"),
            FeatureValues::new(),
            version,
            version as i64,
            Timeliness::OnTime,
        )
    }

    fn key() -> FeatureKey {
        FeatureKey::new(EntityId::new("u1"), FeatureSetId::new("user_rating_stats"))
    }

    struct Fixture {
        store: Arc<VersionedStore>,
        cache: Arc<CacheLayer>,
        resolver: FeatureResolver,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(VersionedStore::in_memory());
        let cache = Arc::new(CacheLayer::start(CacheConfig::default(), clock.clone()));
        let resolver = FeatureResolver::with_clock(
            store.clone(),
            cache.clone(),
            ResolverConfig::default(),
            Arc::new(GatewayMetrics::new()),
            clock,
        );
        Fixture {
            store,
            cache,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_best_effort_falls_back_and_fills_cache() {
        let f = fixture();
        f.store.apply_commit(vector(1)).unwrap();

        let first = f.resolver.resolve(&key(), FreshnessPolicy::BestEffort).await.unwrap();
        assert!(matches!(first, Resolution::Found { source: Source::Store, .. }));

        let second = f.resolver.resolve(&key(), FreshnessPolicy::BestEffort).await.unwrap();
        assert!(matches!(second, Resolution::Found { source: Source::Cache, .. }));
        assert_eq!(f.resolver.metrics().export()["cache_hits"], 1);
    }

    #[tokio::test]
    async fn test_strict_ignores_cache() {
        let f = fixture();
        f.store.apply_commit(vector(1)).unwrap();
        f.resolver.resolve(&key(), FreshnessPolicy::BestEffort).await.unwrap();

        let strict = f.resolver.resolve(&key(), FreshnessPolicy::Strict).await.unwrap();
        assert!(matches!(strict, Resolution::Found { source: Source::Store, .. }));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let f = fixture();
        let res = f.resolver.resolve(&key(), FreshnessPolicy::Strict).await.unwrap();
        assert_eq!(res, Resolution::NotFound);
        assert_eq!(f.resolver.metrics().export()["not_found"], 1);
    }

    #[tokio::test]
    async fn test_outage_without_history_is_unavailable() {
        let f = fixture();
        f.store.set_available(false);
        f.cache.set_available(false);
        let err = f
            .resolver
            .resolve(&key(), FreshnessPolicy::BestEffort)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_last_known_keeps_newest_version() {
        let f = fixture();
        f.resolver.remember(&StoreRecord::new(vector(3), 10));
        f.resolver.remember(&StoreRecord::new(vector(2), 20));

        f.store.set_available(false);
        let res = f.resolver.resolve(&key(), FreshnessPolicy::Strict).await.unwrap();
        assert_eq!(res.vector().map(|v| v.version), Some(3));
        assert!(res.is_degraded());
    }
}
