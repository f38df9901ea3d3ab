//! Atomic counter over conditional blob writes.

use std::sync::Arc;

use bytes::Bytes;
use leasegrid_core::RetryPolicy;
use leasegrid_storage::{Blob, BlobStore, StorageError, WritePrecondition, WriteResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CounterError, CounterResult};

/// Default container for counter blobs.
pub const COUNTER_CONTAINER: &str = "leasegrid-counters";

/// Operation ids remembered in the blob, newest last.
const RECENT_OPS: usize = 32;

/// Blob body. `ops` names the increments that produced `value`, so a writer
/// whose conditional put timed out can tell whether it was committed even
/// after other writers moved the counter on.
#[derive(Debug, Serialize, Deserialize)]
struct CounterBody {
    value: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ops: Vec<String>,
}

/// A signed 64-bit counter stored as a blob.
///
/// Every increment is applied exactly once relative to the version it read;
/// concurrent increments from any number of instances never lose or repeat
/// an update.
#[derive(Clone)]
pub struct AtomicBlobCounter {
    blobs: Arc<dyn BlobStore>,
    container: String,
    name: String,
    /// Policy for write conflicts.
    conflicts: RetryPolicy,
    /// Policy for transient substrate failures.
    retry: RetryPolicy,
}

impl AtomicBlobCounter {
    pub fn new(blobs: Arc<dyn BlobStore>, name: impl Into<String>) -> Self {
        Self {
            blobs,
            container: COUNTER_CONTAINER.to_string(),
            name: name.into(),
            conflicts: RetryPolicy::optimistic_concurrency(),
            retry: RetryPolicy::transient_server_errors(),
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_conflict_policy(mut self, policy: RetryPolicy) -> Self {
        self.conflicts = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `delta` and return the committed value.
    ///
    /// Fails with [`CounterError::NotFound`] once the counter is deleted.
    pub async fn increment(&self, delta: i64) -> CounterResult<i64> {
        self.conflicts
            .run("counter.increment", CounterError::is_conflict, || {
                self.try_increment(delta)
            })
            .await
    }

    async fn try_increment(&self, delta: i64) -> CounterResult<i64> {
        let blob = self.read().await?;
        let mut body = self.parse(&blob)?;
        let next = body.value.checked_add(delta).ok_or_else(|| CounterError::Overflow {
            name: self.name.clone(),
            delta,
        })?;

        let op = Uuid::new_v4().to_string();
        body.value = next;
        body.ops.push(op.clone());
        if body.ops.len() > RECENT_OPS {
            body.ops.drain(..body.ops.len() - RECENT_OPS);
        }
        let data = self.encode(&body)?;
        // Not retried blindly: a timed-out put may still have been committed.
        let result = match self
            .blobs
            .put(&self.container, &self.name, data, WritePrecondition::MatchesVersion(blob.version))
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_transient() => return self.settle(&op, next, e).await,
            Err(e) => return Err(e.into()),
        };

        match result {
            WriteResult::Written { .. } => {
                debug!(counter = %self.name, delta, value = next, "counter incremented");
                Ok(next)
            }
            // Deleted between our read and write.
            WriteResult::PreconditionFailed { current: None } => {
                Err(CounterError::NotFound(self.name.clone()))
            }
            WriteResult::PreconditionFailed { current: Some(_) } => {
                Err(CounterError::Conflict(self.name.clone()))
            }
        }
    }

    /// Decide the outcome of a conditional put that failed transiently by
    /// reading back which operation wrote the blob last.
    async fn settle(&self, op: &str, next: i64, error: StorageError) -> CounterResult<i64> {
        let blob = self.read().await?;
        let body = self.parse(&blob)?;
        if body.ops.iter().any(|o| o == op) {
            debug!(counter = %self.name, value = next, error = %error, "counter write committed despite error");
            return Ok(next);
        }
        warn!(counter = %self.name, error = %error, "counter write not committed, retrying");
        Err(CounterError::Conflict(self.name.clone()))
    }

    /// Current value.
    pub async fn value(&self) -> CounterResult<i64> {
        let blob = self.read().await?;
        Ok(self.parse(&blob)?.value)
    }

    /// Set the counter to `value`, creating it if needed.
    pub async fn reset(&self, value: i64) -> CounterResult<()> {
        let data = self.encode(&CounterBody { value, ops: Vec::new() })?;
        self.retry
            .run("counter.put", StorageError::is_transient, || {
                self.blobs
                    .put(&self.container, &self.name, data.clone(), WritePrecondition::None)
            })
            .await?;
        info!(counter = %self.name, value, "counter reset");
        Ok(())
    }

    /// Remove the counter. Returns false if it did not exist.
    pub async fn delete(&self) -> CounterResult<bool> {
        let existed = self
            .retry
            .run("counter.delete", StorageError::is_transient, || {
                self.blobs.delete(&self.container, &self.name)
            })
            .await?;
        if existed {
            info!(counter = %self.name, "counter deleted");
        }
        Ok(existed)
    }

    async fn read(&self) -> CounterResult<Blob> {
        self.retry
            .run("counter.get", StorageError::is_transient, || {
                self.blobs.get(&self.container, &self.name)
            })
            .await?
            .ok_or_else(|| CounterError::NotFound(self.name.clone()))
    }

    fn encode(&self, body: &CounterBody) -> CounterResult<Bytes> {
        serde_json::to_vec(body)
            .map(Bytes::from)
            .map_err(|e| CounterError::Corrupt {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    fn parse(&self, blob: &Blob) -> CounterResult<CounterBody> {
        serde_json::from_slice(&blob.data).map_err(|e| CounterError::Corrupt {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }
}
