//! Seams to the cloud management service.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ManagementResult;

/// An open channel to the management service.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Current number of worker instances of `deployment`.
    async fn worker_count(&self, deployment: &str) -> ManagementResult<u32>;

    async fn set_worker_count(&self, deployment: &str, count: u32) -> ManagementResult<()>;
}

/// Opens management channels; injected so tests can count connections.
pub trait ManagementConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> ManagementResult<Arc<dyn ManagementApi>>;
}
