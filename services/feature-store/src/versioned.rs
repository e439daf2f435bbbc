//! In-process versioned store with WAL durability
//!
//! Histories live in a sharded concurrent map. Durable commits compare
//! versions and append to the WAL under the WAL lock, then take the key's
//! map guard only long enough to install the record. Readers never wait on
//! WAL I/O.

use crate::error::StoreError;
use crate::history::KeyHistory;
use crate::store::{CommitOutcome, FeatureStore};
use async_trait::async_trait;
use dashmap::DashMap;
use persistence::{
    repair_tail, FsyncPolicy, JournalConfig, JournalEntry, JournalWriter, Recovered,
    RecoveryEngine, Snapshot, SnapshotCleanupPolicy, SnapshotWriter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use types::errors::StaleVersion;
use types::feature::FeatureVector;
use types::ids::FeatureKey;
use types::record::StoreRecord;
use types::time::{Clock, SystemClock};

const COMMIT_KIND: &str = "commit";

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// WAL and snapshot root; `None` keeps the store in memory only
    pub data_dir: Option<PathBuf>,
    /// Retain at most this many versions per key (`None` = all)
    pub max_history_per_key: Option<usize>,
    /// fsync the WAL on every commit
    pub fsync_every_commit: bool,
    pub compress_snapshots: bool,
    /// Snapshots kept after compaction
    pub snapshots_to_keep: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_history_per_key: None,
            fsync_every_commit: true,
            compress_snapshots: true,
            snapshots_to_keep: 2,
        }
    }
}

impl StoreConfig {
    pub fn durable(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    fn wal_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("wal"))
    }

    fn snapshot_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("snapshots"))
    }
}

// ── Statistics ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub keys: usize,
    pub records: usize,
    pub commits: u64,
    pub stale_rejections: u64,
    /// Next WAL sequence (0 when not durable)
    pub wal_sequence: u64,
}

/// Serialized image of every history, used for snapshots
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreImage {
    histories: BTreeMap<FeatureKey, KeyHistory>,
}

// ── Versioned Store ─────────────────────────────────────────────────

/// Cheaply cloneable handle; every clone sees the same histories and WAL
#[derive(Clone)]
pub struct VersionedStore {
    state: Arc<StoreState>,
}

struct StoreState {
    config: StoreConfig,
    histories: DashMap<FeatureKey, KeyHistory>,
    wal: Option<Mutex<JournalWriter>>,
    wal_sequence: AtomicU64,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    commits: AtomicU64,
    stale_rejections: AtomicU64,
}

impl VersionedStore {
    pub fn in_memory() -> Self {
        Self::with_parts(StoreConfig::default(), DashMap::new(), None, Arc::new(SystemClock))
    }

    /// Open the store, recovering from snapshot + WAL when durable.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let (Some(wal_dir), Some(snapshot_dir)) = (config.wal_dir(), config.snapshot_dir()) else {
            return Ok(Self::with_parts(config, DashMap::new(), None, clock));
        };

        repair_tail(&wal_dir)?;
        let max_history = config.max_history_per_key;
        let apply = move |image: &mut StoreImage, entry: &JournalEntry| -> Result<(), String> {
            let record: StoreRecord = entry.decode().map_err(|e| e.to_string())?;
            let history = image.histories.entry(record.key()).or_default();
            // Replay over a snapshot may revisit records it already holds.
            history.advance(record);
            if let Some(max) = max_history {
                history.trim(max);
            }
            Ok(())
        };
        let recovered: Recovered<StoreImage> =
            RecoveryEngine::new(&snapshot_dir, &wal_dir).recover(&apply)?;

        let journal_config = JournalConfig {
            fsync_policy: if config.fsync_every_commit {
                FsyncPolicy::EveryWrite
            } else {
                FsyncPolicy::OnRotation
            },
            ..JournalConfig::new(&wal_dir)
        };
        let writer = JournalWriter::open_at(journal_config, recovered.next_sequence)?;

        let histories: DashMap<FeatureKey, KeyHistory> =
            recovered.state.histories.into_iter().collect();
        info!(
            keys = histories.len(),
            replayed = recovered.metrics.replay_count,
            next_sequence = recovered.next_sequence,
            "feature store recovered"
        );
        Ok(Self::with_parts(config, histories, Some(writer), clock))
    }

    fn with_parts(
        config: StoreConfig,
        histories: DashMap<FeatureKey, KeyHistory>,
        wal: Option<JournalWriter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let wal_sequence = wal.as_ref().map(JournalWriter::next_sequence).unwrap_or(0);
        Self {
            state: Arc::new(StoreState {
                config,
                histories,
                wal: wal.map(Mutex::new),
                wal_sequence: AtomicU64::new(wal_sequence),
                clock,
                available: AtomicBool::new(true),
                commits: AtomicU64::new(0),
                stale_rejections: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.state.wal.is_some()
    }

    /// Compare-and-set commit of `vector`.
    ///
    /// Blocks on WAL I/O when durable; async callers go through
    /// [`FeatureStore::commit`], which moves that work off the runtime.
    pub fn apply_commit(&self, vector: FeatureVector) -> Result<CommitOutcome, StoreError> {
        self.state.commit(vector)
    }

    pub fn latest(&self, key: &FeatureKey) -> Result<Option<StoreRecord>, StoreError> {
        self.state.ensure_available()?;
        Ok(self.state.histories.get(key).and_then(|h| h.latest().cloned()))
    }

    pub fn as_of(&self, key: &FeatureKey, version: u64) -> Result<Option<StoreRecord>, StoreError> {
        self.state.ensure_available()?;
        Ok(self.state.histories.get(key).and_then(|h| h.get(version).cloned()))
    }

    pub fn at_time(&self, key: &FeatureKey, timestamp: i64) -> Result<Option<StoreRecord>, StoreError> {
        self.state.ensure_available()?;
        Ok(self.state.histories.get(key).and_then(|h| h.at(timestamp).cloned()))
    }

    /// Every retained version of a key, ascending
    pub fn history(&self, key: &FeatureKey) -> Vec<StoreRecord> {
        self.state
            .histories
            .get(key)
            .map(|h| h.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot all histories and drop WAL files the snapshot covers.
    ///
    /// Returns the WAL sequence the snapshot covers. No-op in memory.
    pub fn compact(&self) -> Result<u64, StoreError> {
        let state = &self.state;
        let (Some(wal), Some(snapshot_dir)) = (&state.wal, state.config.snapshot_dir()) else {
            return Ok(0);
        };

        // Durable commits install under the WAL lock, so every record below
        // `covered` is visible before the copy; later ones replay idempotently.
        let covered = lock_wal(wal)?.next_sequence();

        let image = StoreImage {
            histories: state
                .histories
                .iter()
                .filter(|e| !e.value().is_empty())
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };

        let snapshot = Snapshot::new(covered, state.clock.now_nanos(), &image)?;
        let path = SnapshotWriter::new(&snapshot_dir, state.config.compress_snapshots)
            .write(&snapshot)?;

        let removed = lock_wal(wal)?.remove_files_before(covered)?;
        SnapshotCleanupPolicy::new(state.config.snapshots_to_keep.max(1)).cleanup(&snapshot_dir)?;

        info!(
            covered,
            keys = image.histories.len(),
            wal_files_removed = removed.len(),
            path = %path.display(),
            "feature store compacted"
        );
        Ok(covered)
    }

    /// Mark the store reachable or unreachable. While unreachable every
    /// operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        if self.state.available.swap(available, Ordering::SeqCst) != available {
            warn!(available, "feature store availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StoreStats {
        let mut keys = 0;
        let mut records = 0;
        for entry in self.state.histories.iter() {
            if !entry.value().is_empty() {
                keys += 1;
                records += entry.value().len();
            }
        }
        StoreStats {
            keys,
            records,
            commits: self.state.commits.load(Ordering::Relaxed),
            stale_rejections: self.state.stale_rejections.load(Ordering::Relaxed),
            wal_sequence: self.state.wal_sequence.load(Ordering::Relaxed),
        }
    }
}

impl StoreState {
    /// Durable commits serialize on the WAL lock: the version check, the
    /// append and the install all happen under it, so WAL order is install
    /// order. The key's map guard is only taken for the in-memory install,
    /// never across I/O.
    fn commit(&self, vector: FeatureVector) -> Result<CommitOutcome, StoreError> {
        self.ensure_available()?;
        let key = vector.key();

        let Some(wal) = &self.wal else {
            let mut history = self.histories.entry(key.clone()).or_default();
            if let Some(rejected) = self.check_version(&key, &vector, history.latest_version()) {
                return Ok(rejected);
            }
            let record = StoreRecord::new(vector, self.clock.now_nanos());
            self.install(&mut history, record.clone());
            drop(history);
            return Ok(self.accepted(&key, record));
        };

        let mut writer = lock_wal(wal)?;
        let current = self.histories.get(&key).and_then(|h| h.latest_version());
        if let Some(rejected) = self.check_version(&key, &vector, current) {
            return Ok(rejected);
        }

        let record = StoreRecord::new(vector, self.clock.now_nanos());
        writer.append_record(record.committed_at, COMMIT_KIND, &record)?;
        self.wal_sequence
            .store(writer.next_sequence(), Ordering::Relaxed);

        let mut history = self.histories.entry(key.clone()).or_default();
        self.install(&mut history, record.clone());
        drop(history);
        drop(writer);

        Ok(self.accepted(&key, record))
    }

    fn check_version(
        &self,
        key: &FeatureKey,
        vector: &FeatureVector,
        current: Option<u64>,
    ) -> Option<CommitOutcome> {
        let current = current?;
        if vector.version > current {
            return None;
        }
        self.stale_rejections.fetch_add(1, Ordering::Relaxed);
        debug!(%key, attempted = vector.version, current, "stale commit rejected");
        Some(CommitOutcome::Rejected(StaleVersion {
            attempted: vector.version,
            current,
        }))
    }

    fn install(&self, history: &mut KeyHistory, record: StoreRecord) {
        history.advance(record);
        if let Some(max) = self.config.max_history_per_key {
            history.trim(max);
        }
    }

    fn accepted(&self, key: &FeatureKey, record: StoreRecord) -> CommitOutcome {
        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(%key, version = record.version(), "commit accepted");
        CommitOutcome::Committed(record)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("feature store unreachable".into()))
        }
    }
}

fn lock_wal(wal: &Mutex<JournalWriter>) -> Result<MutexGuard<'_, JournalWriter>, StoreError> {
    wal.lock()
        .map_err(|_| StoreError::Unavailable("WAL lock poisoned".into()))
}

#[async_trait]
impl FeatureStore for VersionedStore {
    async fn commit(&self, vector: FeatureVector) -> Result<CommitOutcome, StoreError> {
        if !self.is_durable() {
            return self.state.commit(vector);
        }
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || state.commit(vector))
            .await
            .map_err(|e| StoreError::Unavailable(format!("commit task failed: {e}")))?
    }

    async fn read_latest(&self, key: &FeatureKey) -> Result<Option<StoreRecord>, StoreError> {
        self.latest(key)
    }

    async fn read_as_of(
        &self,
        key: &FeatureKey,
        version: u64,
    ) -> Result<Option<StoreRecord>, StoreError> {
        self.as_of(key, version)
    }

    async fn read_at(
        &self,
        key: &FeatureKey,
        timestamp: i64,
    ) -> Result<Option<StoreRecord>, StoreError> {
        self.at_time(key, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::feature::{FeatureValues, Timeliness};
    use types::ids::{EntityId, FeatureSetId};
    use types::time::ManualClock;

    fn vector(entity: &str, version: u64) -> FeatureVector {
        FeatureVector::new(
            EntityId::new(entity),
            FeatureSetId::new("user_rating_stats"),
            FeatureValues::new(),
            version,
            version as i64 * 10,
            Timeliness::OnTime,
        )
    }

    #[test]
    fn test_first_commit_always_accepted() {
        let store = VersionedStore::in_memory();
        let outcome = store.apply_commit(vector("u1", 7)).unwrap();
        assert_eq!(outcome.committed_version(), Some(7));
    }

    #[test]
    fn test_stale_commit_rejected_without_change() {
        let store = VersionedStore::in_memory();
        store.apply_commit(vector("u1", 2)).unwrap();

        let outcome = store.apply_commit(vector("u1", 1)).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Rejected(StaleVersion {
                attempted: 1,
                current: 2
            })
        );
        let equal = store.apply_commit(vector("u1", 2)).unwrap();
        assert!(!equal.is_committed());

        let key = vector("u1", 0).key();
        assert_eq!(store.latest(&key).unwrap().unwrap().version(), 2);
        assert_eq!(store.stats().stale_rejections, 2);
        assert_eq!(store.stats().commits, 1);
    }

    #[test]
    fn test_committed_at_comes_from_clock() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = VersionedStore::open_with_clock(StoreConfig::default(), clock.clone()).unwrap();
        clock.advance(500);
        let CommitOutcome::Committed(record) = store.apply_commit(vector("u1", 1)).unwrap() else {
            panic!("expected commit");
        };
        assert_eq!(record.committed_at, 1_500);
    }

    #[test]
    fn test_unavailable_store_fails_everything() {
        let store = VersionedStore::in_memory();
        store.apply_commit(vector("u1", 1)).unwrap();
        store.set_available(false);

        let key = vector("u1", 0).key();
        assert!(matches!(store.latest(&key), Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.apply_commit(vector("u1", 2)),
            Err(StoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert_eq!(store.latest(&key).unwrap().unwrap().version(), 1);
    }

    #[test]
    fn test_history_cap() {
        let store = VersionedStore::open(StoreConfig {
            max_history_per_key: Some(2),
            ..StoreConfig::default()
        })
        .unwrap();
        for v in 1..=4 {
            store.apply_commit(vector("u1", v)).unwrap();
        }
        let key = vector("u1", 0).key();
        assert!(store.as_of(&key, 2).unwrap().is_none());
        assert_eq!(store.as_of(&key, 3).unwrap().unwrap().version(), 3);
        assert_eq!(store.history(&key).len(), 2);
    }

    #[test]
    fn test_stats_count_keys_and_records() {
        let store = VersionedStore::in_memory();
        store.apply_commit(vector("u1", 1)).unwrap();
        store.apply_commit(vector("u1", 2)).unwrap();
        store.apply_commit(vector("u2", 1)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.wal_sequence, 0);
    }

    #[test]
    fn test_read_completes_while_commit_waits_on_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(StoreConfig::durable(dir.path())).unwrap();
        store.apply_commit(vector("u1", 1)).unwrap();
        let key = vector("u1", 0).key();

        // Hold the WAL as a slow fsync would
        let wal = store.state.wal.as_ref().unwrap().lock().unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.apply_commit(vector("u1", 2)).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        let reader = {
            let store = store.clone();
            let key = key.clone();
            std::thread::spawn(move || store.latest(&key).unwrap().map(|r| r.version()))
        };
        let started = std::time::Instant::now();
        while !reader.is_finished() {
            assert!(
                started.elapsed() < std::time::Duration::from_secs(2),
                "read blocked behind an in-flight commit"
            );
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(reader.join().unwrap(), Some(1));
        assert!(!writer.is_finished());

        drop(wal);
        assert_eq!(writer.join().unwrap().committed_version(), Some(2));
        assert_eq!(store.latest(&key).unwrap().unwrap().version(), 2);
        assert!(store.stats().wal_sequence > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_durable_commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = VersionedStore::open(StoreConfig::durable(dir.path())).unwrap();
            store.commit(vector("u1", 1)).await.unwrap();
            store.commit(vector("u1", 2)).await.unwrap();
            let stale = store.commit(vector("u1", 2)).await.unwrap();
            assert!(!stale.is_committed());
        }
        let reopened = VersionedStore::open(StoreConfig::durable(dir.path())).unwrap();
        let key = vector("u1", 0).key();
        assert_eq!(reopened.latest(&key).unwrap().unwrap().version(), 2);
        assert_eq!(reopened.history(&key).len(), 2);
    }
}
