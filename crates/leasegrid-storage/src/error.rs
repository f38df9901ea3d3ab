//! Error types for the storage substrate.

use thiserror::Error;

/// Result type alias for substrate operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by a queue or blob substrate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("lease lost: {0}")]
    LeaseLost(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Network blips, timeouts, and throttling resolve on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }

    /// The addressed message or lease no longer exists.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::MessageNotFound(_) | Self::LeaseLost(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StorageError::Throttled("q".into()).is_transient());
        assert!(StorageError::Timeout("q".into()).is_transient());
        assert!(StorageError::Transport("q".into()).is_transient());
        assert!(!StorageError::QueueNotFound("q".into()).is_transient());
        assert!(!StorageError::BadRequest("q".into()).is_transient());
        assert!(StorageError::LeaseLost("m".into()).is_gone());
        assert!(!StorageError::Backend("x".into()).is_gone());
    }
}
