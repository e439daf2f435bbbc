//! Topic configuration and partition routing

use std::path::PathBuf;
use std::sync::Arc;
use types::event::Event;

/// Derives the partition key of an event
pub type PartitionKeyFn = Arc<dyn Fn(&Event) -> String + Send + Sync>;

/// Configuration of one topic
#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub name: String,
    /// Fixed partition count; also the number of engine lanes
    pub partitions: u32,
    /// Events retained per partition before the log start advances
    pub retention: usize,
    /// Journal root; `None` keeps the topic in memory only
    pub data_dir: Option<PathBuf>,
    /// fsync every publish instead of on rotation
    pub fsync_every_publish: bool,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            name: "interactions".to_string(),
            partitions: 8,
            retention: 100_000,
            data_dir: None,
            fsync_every_publish: false,
        }
    }
}

impl TopicConfig {
    pub fn in_memory(partitions: u32) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    pub fn durable(partitions: u32, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            partitions,
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }
}

/// Default partition key: the entity id
pub fn entity_key() -> PartitionKeyFn {
    Arc::new(|event: &Event| event.entity_id.as_str().to_string())
}

/// Partition for `key` among `partitions`
///
/// The computation engine routes entities to lanes with the same function,
/// so each entity has exactly one owning lane.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    crc32c::crc32c(key.as_bytes()) % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_partition_routes_everything_to_zero() {
        assert_eq!(partition_for("u1", 1), 0);
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[test]
    fn test_zero_partitions_does_not_divide_by_zero() {
        assert_eq!(partition_for("u1", 0), 0);
    }

    proptest! {
        #[test]
        fn prop_partition_is_stable_and_in_range(key in "[a-z0-9]{1,16}", partitions in 1u32..64) {
            let p = partition_for(&key, partitions);
            prop_assert!(p < partitions);
            prop_assert_eq!(p, partition_for(&key, partitions));
        }
    }
}
