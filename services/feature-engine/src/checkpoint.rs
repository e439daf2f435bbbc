//! Lane checkpoints
//!
//! A checkpoint is the whole entity arena of one lane plus the bus offset it
//! covers. On disk each partition gets its own snapshot directory, written
//! through the persistence snapshot format (bincode, SHA-256, optional zstd).

use crate::aggregate::AggregateState;
use crate::error::EngineError;
use persistence::{Snapshot, SnapshotCleanupPolicy, SnapshotLoader, SnapshotWriter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use types::ids::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneCheckpoint {
    pub partition: u32,
    /// First bus offset not reflected in `aggregates`
    pub next_offset: u64,
    pub aggregates: BTreeMap<EntityId, AggregateState>,
    /// Last versions of evicted entities
    pub retired: BTreeMap<EntityId, u64>,
}

/// When and how lane checkpoints are taken
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Checkpoint after this many consumed offsets
    pub interval: u64,
    /// Snapshots kept per partition
    pub keep: usize,
    pub compress: bool,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            interval: 500,
            keep: 3,
            compress: true,
        }
    }
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &LaneCheckpoint, timestamp: i64) -> Result<(), EngineError>;

    /// Newest usable checkpoint of `partition`
    fn load(&self, partition: u32) -> Result<Option<LaneCheckpoint>, EngineError>;
}

// ── On-disk store ───────────────────────────────────────────────────

pub struct DiskCheckpointStore {
    root: PathBuf,
    compress: bool,
    cleanup: SnapshotCleanupPolicy,
}

impl DiskCheckpointStore {
    pub fn new(root: impl Into<PathBuf>, policy: &CheckpointPolicy) -> Self {
        Self {
            root: root.into(),
            compress: policy.compress,
            cleanup: SnapshotCleanupPolicy::new(policy.keep.max(1)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: u32) -> PathBuf {
        self.root.join(format!("partition-{partition:04}"))
    }
}

impl CheckpointStore for DiskCheckpointStore {
    fn save(&self, checkpoint: &LaneCheckpoint, timestamp: i64) -> Result<(), EngineError> {
        let dir = self.partition_dir(checkpoint.partition);
        let snapshot = Snapshot::new(checkpoint.next_offset, timestamp, checkpoint)?;
        let path = SnapshotWriter::new(&dir, self.compress).write(&snapshot)?;
        let removed = self.cleanup.cleanup(&dir)?;

        info!(
            partition = checkpoint.partition,
            next_offset = checkpoint.next_offset,
            entities = checkpoint.aggregates.len(),
            path = %path.display(),
            removed = removed.len(),
            "lane checkpoint written"
        );
        Ok(())
    }

    fn load(&self, partition: u32) -> Result<Option<LaneCheckpoint>, EngineError> {
        let loader = SnapshotLoader::new(self.partition_dir(partition));
        let snapshot = loader.load_latest_valid::<LaneCheckpoint>()?;
        Ok(snapshot.map(|s| {
            debug!(partition, next_offset = s.sequence, "loaded lane checkpoint");
            s.state
        }))
    }
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<u32, LaneCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &LaneCheckpoint, _timestamp: i64) -> Result<(), EngineError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| EngineError::CheckpointUnavailable("checkpoint lock poisoned".into()))?;
        checkpoints.insert(checkpoint.partition, checkpoint.clone());
        Ok(())
    }

    fn load(&self, partition: u32) -> Result<Option<LaneCheckpoint>, EngineError> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| EngineError::CheckpointUnavailable("checkpoint lock poisoned".into()))?;
        Ok(checkpoints.get(&partition).cloned())
    }
}
