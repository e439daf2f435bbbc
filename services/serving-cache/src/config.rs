use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached (entity, feature set) entries, rounded up
    /// to a multiple of the shard count
    pub capacity: usize,
    /// Independently locked LRU shards (clamped to `1..=capacity`)
    pub shards: usize,
    /// Staleness budget from store commit to cache visibility
    pub max_propagation_lag: Duration,
    /// Records waiting for the propagation task before new ones are dropped
    pub propagation_queue: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            shards: 16,
            max_propagation_lag: Duration::from_millis(500),
            propagation_queue: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}
