//! Service configuration from `FEATURE_*` environment variables

use crate::resolver::ResolverConfig;
use feature_engine::{EngineConfig, PipelineConfig};
use serving_cache::CacheConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Root for bus journals, store WAL/snapshots and lane checkpoints;
    /// `None` runs fully in memory
    pub data_dir: Option<PathBuf>,
    pub partitions: u32,
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub rate_limit_capacity: u32,
    /// Tokens per second
    pub rate_limit_refill: f64,
    pub compact_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: None,
            partitions: 8,
            engine: EngineConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            rate_limit_capacity: 200,
            rate_limit_refill: 100.0,
            compact_interval: Duration::from_secs(300),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unparsable values keep the default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("FEATURE_BIND_ADDR") {
            config.bind_addr = v.parse().unwrap_or(config.bind_addr);
        }
        if let Some(v) = lookup("FEATURE_DATA_DIR").filter(|v| !v.is_empty()) {
            config.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FEATURE_PARTITIONS") {
            config.partitions = parse_or(&v, config.partitions).max(1);
        }
        if let Some(v) = lookup("FEATURE_CACHE_CAPACITY") {
            config.cache.capacity = parse_or(&v, config.cache.capacity);
        }
        if let Some(v) = lookup("FEATURE_CACHE_SHARDS") {
            config.cache.shards = parse_or(&v, config.cache.shards).max(1);
        }
        if let Some(v) = lookup("FEATURE_PROPAGATION_QUEUE") {
            config.cache.propagation_queue = parse_or(&v, config.cache.propagation_queue).max(1);
        }
        if let Some(v) = lookup("FEATURE_MAX_PROPAGATION_LAG_MS") {
            config.cache.max_propagation_lag = millis_or(&v, config.cache.max_propagation_lag);
        }
        if let Some(v) = lookup("FEATURE_RESOLVE_TIMEOUT_MS") {
            config.resolver.resolve_timeout = millis_or(&v, config.resolver.resolve_timeout);
        }
        if let Some(v) = lookup("FEATURE_SKEW_TOLERANCE_MS") {
            config.engine.skew_tolerance = millis_or(&v, config.engine.skew_tolerance);
        }
        if let Some(v) = lookup("FEATURE_CHECKPOINT_INTERVAL") {
            config.pipeline.checkpoint.interval =
                parse_or(&v, config.pipeline.checkpoint.interval).max(1);
        }
        if let Some(v) = lookup("FEATURE_IDLE_EVICTION_SECS") {
            // 0 disables eviction
            config.pipeline.idle_eviction = v
                .trim()
                .parse::<u64>()
                .ok()
                .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
                .unwrap_or(config.pipeline.idle_eviction);
        }
        if let Some(v) = lookup("FEATURE_RATE_LIMIT_CAPACITY") {
            config.rate_limit_capacity = parse_or(&v, config.rate_limit_capacity);
        }
        if let Some(v) = lookup("FEATURE_RATE_LIMIT_REFILL") {
            config.rate_limit_refill = parse_or(&v, config.rate_limit_refill);
        }
        if let Some(v) = lookup("FEATURE_COMPACT_INTERVAL_SECS") {
            config.compact_interval =
                Duration::from_secs(parse_or(&v, config.compact_interval.as_secs()).max(1));
        }

        config
    }
}

fn parse_or<T: FromStr>(raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or(default)
}

fn millis_or(raw: &str, default: Duration) -> Duration {
    raw.trim()
        .parse()
        .map(Duration::from_millis)
        .unwrap_or(default)
}
