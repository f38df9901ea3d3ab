//! Queue substrate contract.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StorageError, StorageResult};

/// Opaque token proving the caller holds the current lease on a message.
///
/// A fresh receipt is issued on every delivery; a receipt from an earlier
/// delivery no longer addresses the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl Receipt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as handed out by the substrate, leased to the puller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Queue-assigned identity, stable across deliveries.
    pub id: String,
    /// Lease handle for this delivery.
    pub receipt: Receipt,
    /// 1 on first delivery, +1 on every re-delivery.
    pub dequeue_count: u32,
    /// Unix ms at which the lease expires and the message resurfaces.
    pub leased_until_ms: u64,
    /// Unix ms at which the message was pushed.
    pub inserted_at_ms: u64,
    pub body: Bytes,
}

/// At-least-once queue with visibility timeouts.
///
/// Implementations must be safe to share between independent dispatch
/// loops: two pullers never receive the same message while its lease holds.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Create the queue. Returns false if it already existed.
    async fn create_queue(&self, queue: &str) -> StorageResult<bool>;

    /// Delete the queue and every message in it. Returns false if absent.
    async fn delete_queue(&self, queue: &str) -> StorageResult<bool>;

    /// Append messages. Fails with `QueueNotFound` if the queue is missing.
    async fn push(&self, queue: &str, bodies: Vec<Bytes>) -> StorageResult<()>;

    /// Lease up to `max_count` visible messages for `visibility_timeout`.
    async fn pull(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> StorageResult<Vec<RawMessage>>;

    /// Remove a leased message.
    ///
    /// `MessageNotFound` if it is already gone, `LeaseLost` if the receipt is
    /// stale.
    async fn delete(&self, queue: &str, id: &str, receipt: &Receipt) -> StorageResult<()>;

    /// Make a leased message visible again right away.
    async fn abandon(&self, queue: &str, id: &str, receipt: &Receipt) -> StorageResult<()>;

    /// Extend the lease by `extension` from now. Returns the new expiry.
    async fn renew(
        &self,
        queue: &str,
        id: &str,
        receipt: &Receipt,
        extension: Duration,
    ) -> StorageResult<u64> {
        let _ = (queue, id, receipt, extension);
        Err(StorageError::Unsupported("lease renewal".to_string()))
    }

    /// Messages currently stored, leased or not.
    async fn approximate_count(&self, queue: &str) -> StorageResult<usize>;

    /// Drop every message but keep the queue.
    async fn clear(&self, queue: &str) -> StorageResult<()>;
}
