//! Runner error types.

use leasegrid_core::ConfigError;
use leasegrid_queue::QueueError;
use leasegrid_storage::StorageError;
use thiserror::Error;

use crate::restart::RestartRequested;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Fatal: the process must restart. Propagates out of the balancer.
    #[error(transparent)]
    Restart(#[from] RestartRequested),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid registration: {0}")]
    Config(#[from] ConfigError),

    #[error("runner already registered: {0}")]
    Duplicate(String),

    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("corrupt state blob {name}: {reason}")]
    CorruptState { name: String, reason: String },
}

impl RunnerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RunnerError::Conflict(_))
    }
}
