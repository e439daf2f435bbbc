//! Event Bus Adapter
//!
//! `publish` appends to the partition chosen by the topic's key function;
//! `subscribe` hands out a restartable cursor over one partition. Delivery
//! is at-least-once and ordered within a partition.

use crate::error::BusError;
use crate::offsets::OffsetStore;
use crate::partition::Partition;
use crate::subscription::Subscription;
use crate::topic::{entity_key, partition_for, PartitionKeyFn, TopicConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::event::Event;
use types::time::{Clock, SystemClock};

/// Acknowledgement of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub partition: u32,
    pub offset: u64,
}

/// Bus-level counters
#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    rejected_unavailable: AtomicU64,
}

/// Point-in-time view of bus counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub rejected_unavailable: u64,
    pub partitions: u32,
}

pub struct EventBus {
    config: TopicConfig,
    key_fn: PartitionKeyFn,
    partitions: Vec<Arc<Partition>>,
    offsets: Arc<OffsetStore>,
    available: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    counters: BusCounters,
}

impl EventBus {
    /// Open the topic, replaying partition journals when `data_dir` is set.
    pub fn open(config: TopicConfig) -> Result<Self, BusError> {
        Self::open_with(config, entity_key(), Arc::new(SystemClock))
    }

    pub fn open_with(
        config: TopicConfig,
        key_fn: PartitionKeyFn,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BusError> {
        let partitions_n = config.partitions.max(1);
        let (partitions, offsets) = match &config.data_dir {
            Some(dir) => {
                let mut partitions = Vec::with_capacity(partitions_n as usize);
                for id in 0..partitions_n {
                    let part_dir = dir.join(format!("partition-{id:04}"));
                    partitions.push(Arc::new(Partition::open(
                        id,
                        config.retention,
                        &part_dir,
                        config.fsync_every_publish,
                    )?));
                }
                (partitions, OffsetStore::open(dir)?)
            }
            None => (
                (0..partitions_n)
                    .map(|id| Arc::new(Partition::in_memory(id, config.retention)))
                    .collect(),
                OffsetStore::in_memory(),
            ),
        };

        info!(
            topic = %config.name,
            partitions = partitions_n,
            retention = config.retention,
            durable = config.data_dir.is_some(),
            "event bus opened"
        );

        Ok(Self {
            config,
            key_fn,
            partitions,
            offsets: Arc::new(offsets),
            available: Arc::new(AtomicBool::new(true)),
            clock,
            counters: BusCounters::default(),
        })
    }

    pub fn in_memory(partitions: u32) -> Self {
        let config = TopicConfig::in_memory(partitions);
        // In-memory partitions and offsets cannot fail to open.
        Self {
            key_fn: entity_key(),
            partitions: (0..config.partitions.max(1))
                .map(|id| Arc::new(Partition::in_memory(id, config.retention)))
                .collect(),
            config,
            offsets: Arc::new(OffsetStore::in_memory()),
            available: Arc::new(AtomicBool::new(true)),
            clock: Arc::new(SystemClock),
            counters: BusCounters::default(),
        }
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Partition an event would be routed to
    pub fn partition_of(&self, event: &Event) -> u32 {
        partition_for(&(self.key_fn)(event), self.partition_count())
    }

    pub fn publish(&self, event: Event) -> Result<Published, BusError> {
        if !self.is_available() {
            self.counters.rejected_unavailable.fetch_add(1, Ordering::Relaxed);
            return Err(BusError::Unavailable(format!(
                "topic {} is unreachable",
                self.config.name
            )));
        }

        let partition = self.partition_of(&event);
        let entity_id = event.entity_id.clone();
        let offset = self.partitions[partition as usize].append(event, self.clock.now_nanos())?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        debug!(%entity_id, partition, offset, "event published");
        Ok(Published { partition, offset })
    }

    /// Cursor over `partition` for `group`, positioned at the group's
    /// committed offset or at the log start.
    pub fn subscribe(&self, group: &str, partition: u32) -> Result<Subscription, BusError> {
        let part = self
            .partitions
            .get(partition as usize)
            .cloned()
            .ok_or(BusError::UnknownPartition {
                partition,
                partitions: self.partition_count(),
            })?;

        let (log_start, _) = part.bounds()?;
        let position = match self.offsets.committed(group, partition)? {
            Some(committed) if committed < log_start => {
                warn!(
                    group,
                    partition,
                    committed,
                    log_start,
                    "committed offset expired by retention, starting at log start"
                );
                log_start
            }
            Some(committed) => committed,
            None => log_start,
        };

        info!(group, partition, position, "subscribed");
        Ok(Subscription::new(
            group.to_string(),
            part,
            position,
            self.offsets.clone(),
            self.available.clone(),
        ))
    }

    pub fn committed_offset(&self, group: &str, partition: u32) -> Result<Option<u64>, BusError> {
        self.offsets.committed(group, partition)
    }

    /// (log start, end) of a partition
    pub fn bounds(&self, partition: u32) -> Result<(u64, u64), BusError> {
        self.partitions
            .get(partition as usize)
            .ok_or(BusError::UnknownPartition {
                partition,
                partitions: self.partition_count(),
            })?
            .bounds()
    }

    /// Mark the bus reachable or unreachable.
    ///
    /// While unreachable, publishes and subscription reads fail with
    /// [`BusError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was != available {
            warn!(topic = %self.config.name, available, "bus availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Flush and fsync all partition journals.
    pub fn sync(&self) -> Result<(), BusError> {
        for partition in &self.partitions {
            partition.sync()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            rejected_unavailable: self.counters.rejected_unavailable.load(Ordering::Relaxed),
            partitions: self.partition_count(),
        }
    }
}
