//! Lease queue error types.

use leasegrid_storage::StorageError;
use thiserror::Error;

/// Result type alias for lease queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by [`LeaseQueue`](crate::LeaseQueue) and the quarantine store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue does not exist. Permanent; never retried.
    #[error("queue missing: {0}")]
    QueueMissing(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt quarantine record: {0}")]
    CorruptRecord(String),
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QueueNotFound(queue) => QueueError::QueueMissing(queue),
            other => QueueError::Storage(other),
        }
    }
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Storage(e) if e.is_transient())
    }
}
