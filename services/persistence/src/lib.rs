//! Persistence primitives for the feature pipeline
//!
//! Append-only journals with CRC32C framing, sequential readers with
//! corruption detection, integrity-hashed snapshots, and snapshot + journal
//! recovery. Bus partitions, the feature store WAL and engine checkpoints
//! are all built from these pieces.

pub mod journal;
pub mod reader;
pub mod recovery;
pub mod snapshot;

pub use journal::{
    FlushPolicy, FsyncPolicy, JournalConfig, JournalEntry, JournalError, JournalWriter,
};
pub use reader::{repair_tail, JournalReader, ReaderError};
pub use recovery::{EntryApplier, Recovered, RecoveryEngine, RecoveryError};
pub use snapshot::{
    Snapshot, SnapshotCleanupPolicy, SnapshotError, SnapshotLoader,
    SnapshotWriter,
};
