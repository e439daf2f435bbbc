//! Recovery: latest snapshot + journal suffix replay
//!
//! 1. Load the newest snapshot that verifies (or start from `S::default()`)
//! 2. Seek the journal to the snapshot's sequence
//! 3. Replay every later entry through an [`EntryApplier`]
//! 4. Fail on sequence gaps or checksum damage inside the replayed range;
//!    a torn tail after the last complete entry is tolerated and reported

use crate::journal::JournalEntry;
use crate::reader::{CorruptionKind, CorruptionRecord, JournalReader, ReaderError};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotLoader, SnapshotWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Journal gap during replay: expected sequence {expected}, found {found}")]
    Gap { expected: u64, found: u64 },

    #[error("Apply failed at sequence {sequence}: {reason}")]
    Apply { sequence: u64, reason: String },
}

// ── Recovery Metrics ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    /// Sequence covered by the loaded snapshot (0 if none)
    pub snapshot_sequence: u64,
    pub snapshot_load_time_ms: u64,
    pub replay_count: u64,
    pub replay_time_ms: u64,
    pub total_recovery_time_ms: u64,
    /// Unparseable regions skipped at the end of journal files
    pub torn_tail_entries: usize,
}

// ── Entry Applier ───────────────────────────────────────────────────

/// Defines how a journal entry transforms recovered state.
pub trait EntryApplier<S> {
    fn apply(&self, state: &mut S, entry: &JournalEntry) -> Result<(), String>;
}

impl<S, F> EntryApplier<S> for F
where
    F: Fn(&mut S, &JournalEntry) -> Result<(), String>,
{
    fn apply(&self, state: &mut S, entry: &JournalEntry) -> Result<(), String> {
        self(state, entry)
    }
}

/// Outcome of a successful recovery
#[derive(Debug)]
pub struct Recovered<S> {
    pub state: S,
    /// Sequence the journal writer must continue at
    pub next_sequence: u64,
    pub metrics: RecoveryMetrics,
    pub corruption: Vec<CorruptionRecord>,
}

// ── Recovery Engine ─────────────────────────────────────────────────

pub struct RecoveryEngine {
    snapshot_dir: PathBuf,
    journal_dir: PathBuf,
}

impl RecoveryEngine {
    pub fn new(snapshot_dir: impl Into<PathBuf>, journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            journal_dir: journal_dir.into(),
        }
    }

    pub fn recover<S, A>(&self, applier: &A) -> Result<Recovered<S>, RecoveryError>
    where
        S: Default + Serialize + DeserializeOwned,
        A: EntryApplier<S>,
    {
        let total_start = Instant::now();
        let mut metrics = RecoveryMetrics::default();

        let load_start = Instant::now();
        let (mut state, snapshot_seq) =
            match SnapshotLoader::new(&self.snapshot_dir).load_latest_valid::<S>()? {
                Some(snapshot) => {
                    info!(
                        sequence = snapshot.sequence,
                        checksum = %&snapshot.checksum[..snapshot.checksum.len().min(16)],
                        "snapshot loaded"
                    );
                    (snapshot.state, snapshot.sequence)
                }
                None => {
                    info!("no snapshot found, replaying journal from start");
                    (S::default(), 0)
                }
            };
        metrics.snapshot_sequence = snapshot_seq;
        metrics.snapshot_load_time_ms = load_start.elapsed().as_millis() as u64;

        let replay_start = Instant::now();
        let mut reader = JournalReader::open(&self.journal_dir)?;
        reader.seek_to_sequence(snapshot_seq)?;

        let mut expected = snapshot_seq;
        while let Some(entry) = reader.next_entry()? {
            // Compacted prefixes are always covered by a snapshot
            if entry.sequence != expected {
                return Err(RecoveryError::Gap {
                    expected,
                    found: entry.sequence,
                });
            }
            applier
                .apply(&mut state, &entry)
                .map_err(|reason| RecoveryError::Apply {
                    sequence: entry.sequence,
                    reason,
                })?;
            expected += 1;
            metrics.replay_count += 1;
        }
        metrics.replay_time_ms = replay_start.elapsed().as_millis() as u64;

        let corruption = reader.corruption_log().to_vec();
        metrics.torn_tail_entries = corruption
            .iter()
            .filter(|c| c.kind == CorruptionKind::TruncatedEntry)
            .count();
        if !corruption.is_empty() {
            warn!(records = corruption.len(), "journal corruption skipped during recovery");
        }

        metrics.total_recovery_time_ms = total_start.elapsed().as_millis() as u64;
        info!(
            snapshot_sequence = snapshot_seq,
            replayed = metrics.replay_count,
            next_sequence = expected,
            elapsed_ms = metrics.total_recovery_time_ms,
            "recovery complete"
        );

        Ok(Recovered {
            state,
            next_sequence: expected,
            metrics,
            corruption,
        })
    }

    /// Snapshot `state` as covering every journal entry below `next_sequence`.
    pub fn take_snapshot<S: Serialize>(
        &self,
        state: S,
        next_sequence: u64,
        timestamp: i64,
        compress: bool,
    ) -> Result<PathBuf, RecoveryError> {
        let snapshot = Snapshot::new(next_sequence, timestamp, state)?;
        Ok(SnapshotWriter::new(&self.snapshot_dir, compress).write(&snapshot)?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Totals = BTreeMap<String, u64>;

    fn add(state: &mut Totals, entry: &JournalEntry) -> Result<(), String> {
        let (key, amount): (String, u64) = entry.decode().map_err(|e| e.to_string())?;
        *state.entry(key).or_default() += amount;
        Ok(())
    }

    fn write(dir: &std::path::Path, from: u64, records: &[(&str, u64)]) {
        let mut writer = JournalWriter::open_at(JournalConfig::new(dir), from).unwrap();
        for (key, amount) in records {
            writer
                .append_record(0, "add", &(key.to_string(), *amount))
                .unwrap();
        }
    }

    #[test]
    fn test_recover_from_journal_only() {
        let tmp = TempDir::new().unwrap();
        let journal = tmp.path().join("wal");
        write(&journal, 0, &[("a", 1), ("b", 2), ("a", 3)]);

        let engine = RecoveryEngine::new(tmp.path().join("snap"), &journal);
        let recovered: Recovered<Totals> = engine.recover(&add).unwrap();

        assert_eq!(recovered.state["a"], 4);
        assert_eq!(recovered.state["b"], 2);
        assert_eq!(recovered.next_sequence, 3);
        assert_eq!(recovered.metrics.replay_count, 3);
    }

    #[test]
    fn test_recover_snapshot_plus_suffix() {
        let tmp = TempDir::new().unwrap();
        let journal = tmp.path().join("wal");
        write(&journal, 0, &[("a", 1), ("a", 1)]);

        let engine = RecoveryEngine::new(tmp.path().join("snap"), &journal);
        let mut snap = Totals::new();
        snap.insert("a".into(), 2);
        engine.take_snapshot(&snap, 2, 0, true).unwrap();

        write(&journal, 2, &[("a", 5)]);

        let recovered: Recovered<Totals> = engine.recover(&add).unwrap();
        assert_eq!(recovered.state["a"], 7);
        assert_eq!(recovered.metrics.snapshot_sequence, 2);
        assert_eq!(recovered.metrics.replay_count, 1);
        assert_eq!(recovered.next_sequence, 3);
    }

    #[test]
    fn test_empty_directories_recover_default() {
        let tmp = TempDir::new().unwrap();
        let engine = RecoveryEngine::new(tmp.path().join("snap"), tmp.path().join("wal"));
        let recovered: Recovered<Totals> = engine.recover(&add).unwrap();
        assert!(recovered.state.is_empty());
        assert_eq!(recovered.next_sequence, 0);
    }

    #[test]
    fn test_apply_failure_reports_sequence() {
        let tmp = TempDir::new().unwrap();
        let journal = tmp.path().join("wal");
        let mut writer = JournalWriter::open(JournalConfig::new(&journal)).unwrap();
        writer.append_record(0, "add", &("a".to_string(), 1u64)).unwrap();
        writer.append_record(0, "junk", &7u8).unwrap();
        drop(writer);

        let engine = RecoveryEngine::new(tmp.path().join("snap"), &journal);
        let result: Result<Recovered<Totals>, _> = engine.recover(&add);
        assert!(matches!(result, Err(RecoveryError::Apply { sequence: 1, .. })));
    }
}
