use thiserror::Error;
use types::errors::Transient;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("serving cache unavailable: {0}")]
    Unavailable(String),
}

impl Transient for CacheError {
    fn is_transient(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}
