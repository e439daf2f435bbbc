//! Feature store errors

use persistence::{JournalError, ReaderError, RecoveryError, SnapshotError};
use thiserror::Error;
use types::errors::Transient;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Store momentarily unreachable; the caller owning the retry budget
    /// retries with backoff
    #[error("feature store unavailable: {0}")]
    Unavailable(String),

    #[error("WAL append failed: {0}")]
    Journal(#[from] JournalError),

    #[error("WAL repair failed: {0}")]
    Reader(#[from] ReaderError),

    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
