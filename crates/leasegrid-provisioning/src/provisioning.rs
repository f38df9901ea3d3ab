//! Worker-count provisioning for one deployment.

use std::future::Future;
use std::sync::Arc;

use leasegrid_core::RetryPolicy;
use tracing::{debug, info};

use crate::api::{ManagementApi, ManagementConnector};
use crate::channel::ChannelCache;
use crate::error::{ManagementError, ManagementResult};

pub struct Provisioning {
    endpoint: String,
    deployment: String,
    connector: Arc<dyn ManagementConnector>,
    channels: Arc<ChannelCache<dyn ManagementApi>>,
    retry: RetryPolicy,
}

impl Provisioning {
    pub fn new(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        connector: Arc<dyn ManagementConnector>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            connector,
            channels: Arc::new(ChannelCache::new()),
            retry: RetryPolicy::transient_server_errors(),
        }
    }

    /// Share a channel cache with other provisioning handles.
    pub fn with_channels(mut self, channels: Arc<ChannelCache<dyn ManagementApi>>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn channels(&self) -> &Arc<ChannelCache<dyn ManagementApi>> {
        &self.channels
    }

    pub async fn worker_count(&self) -> ManagementResult<u32> {
        let deployment = self.deployment.as_str();
        self.call("management.worker_count", |api| async move {
            api.worker_count(deployment).await
        })
        .await
    }

    pub async fn set_worker_count(&self, count: u32) -> ManagementResult<()> {
        if count == 0 {
            return Err(ManagementError::InvalidWorkerCount(count));
        }
        let deployment = self.deployment.as_str();
        self.call("management.set_worker_count", |api| async move {
            api.set_worker_count(deployment, count).await
        })
        .await?;
        info!(deployment = %self.deployment, count, "worker count set");
        Ok(())
    }

    /// Add `delta` workers (negative removes), never going below one.
    /// Returns the resulting count; no write happens when it is unchanged.
    pub async fn scale_by(&self, delta: i64) -> ManagementResult<u32> {
        let current = self.worker_count().await?;
        let target = (i64::from(current) + delta).clamp(1, i64::from(u32::MAX)) as u32;
        if target == current {
            debug!(deployment = %self.deployment, count = current, "worker count unchanged");
            return Ok(current);
        }
        self.set_worker_count(target).await?;
        Ok(target)
    }

    /// Run `f` against a cached channel, retrying transient failures. A
    /// transient failure faults the channel so the retry reconnects.
    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> ManagementResult<T>
    where
        F: Fn(Arc<dyn ManagementApi>) -> Fut,
        Fut: Future<Output = ManagementResult<T>>,
    {
        let f = &f;
        self.retry
            .run(operation, ManagementError::is_transient, || async move {
                let channel = self
                    .channels
                    .acquire(&self.endpoint, |endpoint| self.connector.connect(endpoint))?;
                let result = f(channel.handle()).await;
                match result {
                    Err(ref e) if e.is_transient() => channel.fault(),
                    _ => drop(channel),
                }
                result
            })
            .await
    }
}
