//! Counter error types.

use leasegrid_storage::StorageError;
use thiserror::Error;

pub type CounterResult<T> = Result<T, CounterError>;

#[derive(Debug, Error)]
pub enum CounterError {
    /// The counter blob does not exist (never seeded, or deleted because
    /// the workflow it tracked already finished).
    #[error("counter not found: {0}")]
    NotFound(String),

    /// Another writer committed between our read and write.
    #[error("write conflict on counter {0}")]
    Conflict(String),

    #[error("counter {name} overflowed applying {delta}")]
    Overflow { name: String, delta: i64 },

    #[error("corrupt counter {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CounterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CounterError::Conflict(_))
    }

    /// A missing counter means the tracked work is already finalized.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CounterError::NotFound(_))
    }
}
