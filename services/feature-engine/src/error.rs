use event_bus::BusError;
use feature_store::StoreError;
use persistence::SnapshotError;
use thiserror::Error;
use types::errors::{Transient, ValidationError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] SnapshotError),

    #[error("checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),

    #[error("checkpoint for partition {found} loaded into lane {expected}")]
    CheckpointMismatch { expected: u32, found: u32 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl Transient for EngineError {
    fn is_transient(&self) -> bool {
        match self {
            EngineError::Bus(e) => e.is_transient(),
            EngineError::Store(e) => e.is_transient(),
            EngineError::CheckpointUnavailable(_) => true,
            _ => false,
        }
    }
}
