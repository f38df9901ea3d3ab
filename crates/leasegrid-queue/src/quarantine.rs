//! Quarantine store for poison messages.
//!
//! Records are operator-owned: nothing in leasegrid deletes them except an
//! explicit [`QuarantineStore::discard`] or a restore through
//! [`LeaseQueue::restore`](crate::LeaseQueue::restore).
//!
//! Records are written with a does-not-exist precondition keyed by
//! `{queue}/{message id}`, so a quarantine attempt repeated after a crash
//! leaves exactly one record.

use std::sync::Arc;

use bytes::Bytes;
use leasegrid_core::RetryPolicy;
use leasegrid_storage::{BlobStore, StorageError, WritePrecondition, WriteResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};

/// Container holding quarantine records.
pub const QUARANTINE_CONTAINER: &str = "leasegrid-failing-messages";

/// Container holding the last handler failure per in-flight message.
pub const EVIDENCE_CONTAINER: &str = "leasegrid-failure-evidence";

/// Evidence longer than this is truncated before being stored.
const MAX_EVIDENCE_BYTES: usize = 4 * 1024;

/// A poison message moved out of its live queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub queue: String,
    pub message_id: String,
    /// Delivery count observed when the message was quarantined.
    pub dequeue_count: u32,
    pub payload: Value,
    pub reason: String,
    /// Last handler failure recorded for the message, if any.
    pub last_failure: Option<String>,
    pub quarantined_at_ms: u64,
}

impl QuarantineRecord {
    pub fn blob_name(&self) -> String {
        record_name(&self.queue, &self.message_id)
    }
}

fn record_name(queue: &str, message_id: &str) -> String {
    format!("{queue}/{message_id}")
}

/// Persistent side-store for poison messages.
#[derive(Clone)]
pub struct QuarantineStore {
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl QuarantineStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            retry: RetryPolicy::transient_server_errors(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store a record. Returns false if one already existed for the message.
    pub async fn put(&self, record: &QuarantineRecord) -> QueueResult<bool> {
        let name = record.blob_name();
        let body = Bytes::from(serde_json::to_vec(record)?);
        let result = self
            .retry
            .run("quarantine.put", StorageError::is_transient, || {
                self.blobs.put(
                    QUARANTINE_CONTAINER,
                    &name,
                    body.clone(),
                    WritePrecondition::DoesNotExist,
                )
            })
            .await?;

        let created = matches!(result, WriteResult::Written { .. });
        if created {
            debug!(%name, dequeue_count = record.dequeue_count, "quarantine record stored");
        } else {
            debug!(%name, "quarantine record already present");
        }
        Ok(created)
    }

    pub async fn get(&self, queue: &str, message_id: &str) -> QueueResult<Option<QuarantineRecord>> {
        let name = record_name(queue, message_id);
        let blob = self
            .retry
            .run("quarantine.get", StorageError::is_transient, || {
                self.blobs.get(QUARANTINE_CONTAINER, &name)
            })
            .await?;
        blob.map(|b| {
            serde_json::from_slice(&b.data).map_err(|e| QueueError::CorruptRecord(format!("{name}: {e}")))
        })
        .transpose()
    }

    /// All records quarantined from `queue`, ordered by blob name.
    pub async fn list(&self, queue: &str) -> QueueResult<Vec<QuarantineRecord>> {
        let prefix = format!("{queue}/");
        let names = self
            .retry
            .run("quarantine.list", StorageError::is_transient, || {
                self.blobs.list(QUARANTINE_CONTAINER, &prefix)
            })
            .await?;

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let Some(message_id) = name.strip_prefix(&prefix) else {
                continue;
            };
            // A concurrent discard may remove the record between list and get.
            if let Some(record) = self.get(queue, message_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete a record. Returns false if it did not exist.
    pub async fn discard(&self, queue: &str, message_id: &str) -> QueueResult<bool> {
        let name = record_name(queue, message_id);
        let existed = self
            .retry
            .run("quarantine.discard", StorageError::is_transient, || {
                self.blobs.delete(QUARANTINE_CONTAINER, &name)
            })
            .await?;
        if existed {
            info!(%queue, %message_id, "quarantine record discarded");
        }
        Ok(existed)
    }

    /// Remember the latest handler failure for an in-flight message.
    pub async fn record_evidence(&self, queue: &str, message_id: &str, evidence: &str) -> QueueResult<()> {
        let name = record_name(queue, message_id);
        let body = Bytes::from(truncate(evidence, MAX_EVIDENCE_BYTES).to_string());
        self.retry
            .run("evidence.put", StorageError::is_transient, || {
                self.blobs
                    .put(EVIDENCE_CONTAINER, &name, body.clone(), WritePrecondition::None)
            })
            .await?;
        Ok(())
    }

    /// Read the recorded failure for a message, if any.
    pub async fn evidence(&self, queue: &str, message_id: &str) -> QueueResult<Option<String>> {
        let name = record_name(queue, message_id);
        let blob = self
            .retry
            .run("evidence.get", StorageError::is_transient, || {
                self.blobs.get(EVIDENCE_CONTAINER, &name)
            })
            .await?;
        Ok(blob.map(|b| String::from_utf8_lossy(&b.data).into_owned()))
    }

    pub async fn clear_evidence(&self, queue: &str, message_id: &str) -> QueueResult<()> {
        let name = record_name(queue, message_id);
        self.retry
            .run("evidence.delete", StorageError::is_transient, || {
                self.blobs.delete(EVIDENCE_CONTAINER, &name)
            })
            .await?;
        Ok(())
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
