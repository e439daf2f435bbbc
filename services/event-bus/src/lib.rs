//! Event Bus Adapter for the feature pipeline
//!
//! Durable, ordered, partitioned ingestion of interaction events with an
//! at-least-once delivery contract per partition key. Consumers must be
//! idempotent under redelivery; the bus itself never de-duplicates.

pub mod bus;
pub mod error;
pub mod offsets;
pub mod partition;
pub mod subscription;
pub mod topic;

pub use bus::{BusStats, EventBus, Published};
pub use error::BusError;
pub use subscription::{Delivery, Subscription};
pub use topic::{entity_key, partition_for, PartitionKeyFn, TopicConfig};
