//! Management API error types.

use thiserror::Error;

pub type ManagementResult<T> = Result<T, ManagementError>;

#[derive(Debug, Error)]
pub enum ManagementError {
    /// The management endpoint could not be reached.
    #[error("management endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("management call timed out: {0}")]
    Timeout(String),

    /// TLS or credential negotiation failed; usually clears on reconnect.
    #[error("security negotiation failed: {0}")]
    SecurityNegotiation(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("invalid worker count {0}: at least one worker is required")]
    InvalidWorkerCount(u32),

    #[error("management API rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("cannot open management channel to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
}

impl ManagementError {
    /// Failures of the transport rather than of the request. These are
    /// retried, and the channel that produced them is discarded.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ManagementError::EndpointNotFound(_)
                | ManagementError::Timeout(_)
                | ManagementError::SecurityNegotiation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        assert!(ManagementError::EndpointNotFound("mgmt.local".into()).is_transient());
        assert!(ManagementError::Timeout("get".into()).is_transient());
        assert!(ManagementError::SecurityNegotiation("handshake".into()).is_transient());
    }

    #[test]
    fn request_failures_are_permanent() {
        assert!(!ManagementError::DeploymentNotFound("prod".into()).is_transient());
        assert!(!ManagementError::InvalidWorkerCount(0).is_transient());
        assert!(
            !ManagementError::Rejected {
                status: 409,
                message: "operation in progress".into(),
            }
            .is_transient()
        );
        assert!(
            !ManagementError::Connect {
                endpoint: "mgmt.local".into(),
                reason: "bad certificate".into(),
            }
            .is_transient()
        );
    }
}
