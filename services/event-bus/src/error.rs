//! Bus error types

use persistence::{JournalError, ReaderError};
use std::io;
use thiserror::Error;
use types::errors::Transient;

#[derive(Error, Debug)]
pub enum BusError {
    /// The bus cannot be reached; retry with backoff
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    #[error("unknown partition {partition} (topic has {partitions})")]
    UnknownPartition { partition: u32, partitions: u32 },

    #[error("subscription closed")]
    Closed,

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("journal read error: {0}")]
    Reader(#[from] ReaderError),

    #[error("offset store error: {0}")]
    OffsetStore(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Transient for BusError {
    fn is_transient(&self) -> bool {
        matches!(self, BusError::Unavailable(_))
    }
}
