//! Lease queue: typed push, lazy poison quarantine on pull, idempotent delete.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use leasegrid_core::{Clock, RetryPolicy, SystemClock};
use leasegrid_storage::{BlobStore, QueueStore, RawMessage, Receipt, StorageError, WritePrecondition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, OVERFLOW_CONTAINER, encode_inline};
use crate::error::{QueueError, QueueResult};
use crate::quarantine::{QuarantineRecord, QuarantineStore};

/// A message leased from a [`LeaseQueue`].
///
/// The id and receipt together address this delivery; a later delivery of
/// the same message carries a different receipt.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub id: String,
    pub receipt: Receipt,
    pub dequeue_count: u32,
    pub leased_until_ms: u64,
    pub inserted_at_ms: u64,
    /// Resolved JSON payload; `None` when the queue body was not a valid envelope.
    payload: Option<Value>,
    raw: Bytes,
    overflow: Option<String>,
}

impl LeasedMessage {
    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        match self.payload {
            Some(ref payload) => Ok(serde_json::from_value(payload.clone())?),
            None => Err(QueueError::Serialize(serde::de::Error::custom(format!(
                "message {} is not a leasegrid envelope",
                self.id
            )))),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Payload as stored in a quarantine record.
    fn record_payload(&self) -> Value {
        self.payload
            .clone()
            .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&self.raw).into_owned()))
    }
}

/// Typed lease-based queue over a [`QueueStore`] and a [`BlobStore`].
#[derive(Clone)]
pub struct LeaseQueue {
    name: String,
    queues: Arc<dyn QueueStore>,
    blobs: Arc<dyn BlobStore>,
    quarantine: QuarantineStore,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl LeaseQueue {
    pub fn new(name: impl Into<String>, queues: Arc<dyn QueueStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            name: name.into(),
            queues,
            quarantine: QuarantineStore::new(blobs.clone()),
            blobs,
            retry: RetryPolicy::transient_server_errors(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Policy applied to transient substrate failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.quarantine = self.quarantine.with_retry(retry);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quarantine(&self) -> &QuarantineStore {
        &self.quarantine
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Create the queue if missing. Returns true if it was created.
    pub async fn ensure_exists(&self) -> QueueResult<bool> {
        let created = self
            .retry
            .run("queue.create", StorageError::is_transient, || {
                self.queues.create_queue(&self.name)
            })
            .await?;
        if created {
            info!(queue = %self.name, "queue created");
        }
        Ok(created)
    }

    pub async fn approximate_count(&self) -> QueueResult<usize> {
        Ok(self
            .retry
            .run("queue.count", StorageError::is_transient, || {
                self.queues.approximate_count(&self.name)
            })
            .await?)
    }

    /// Drop every message together with its overflow payloads.
    pub async fn clear(&self) -> QueueResult<()> {
        self.retry
            .run("queue.clear", StorageError::is_transient, || self.queues.clear(&self.name))
            .await?;

        let prefix = format!("{}/", self.name);
        let overflow = self
            .retry
            .run("overflow.list", StorageError::is_transient, || {
                self.blobs.list(OVERFLOW_CONTAINER, &prefix)
            })
            .await?;
        for blob in &overflow {
            self.delete_overflow(blob).await;
        }
        info!(queue = %self.name, overflow = overflow.len(), "queue cleared");
        Ok(())
    }

    // ── Messages ───────────────────────────────────────────────────

    /// Enqueue `items`, creating the queue on first use.
    pub async fn push<T: Serialize>(&self, items: &[T]) -> QueueResult<()> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(serde_json::to_value(item)?);
        }
        self.push_values(values).await
    }

    async fn push_values(&self, values: Vec<Value>) -> QueueResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut bodies = Vec::with_capacity(values.len());
        for value in &values {
            bodies.push(self.encode(value).await?);
        }

        let pushed = self
            .retry
            .run("queue.push", StorageError::is_transient, || {
                self.queues.push(&self.name, bodies.clone())
            })
            .await;
        match pushed {
            Err(StorageError::QueueNotFound(_)) => {
                self.ensure_exists().await?;
                self.retry
                    .run("queue.push", StorageError::is_transient, || {
                        self.queues.push(&self.name, bodies.clone())
                    })
                    .await?;
            }
            other => other?,
        }
        debug!(queue = %self.name, count = bodies.len(), "messages pushed");
        Ok(())
    }

    async fn encode(&self, value: &Value) -> QueueResult<Bytes> {
        if let Some(body) = encode_inline(value)? {
            return Ok(body);
        }

        let blob = format!("{}/{}", self.name, Uuid::new_v4());
        let data = Bytes::from(serde_json::to_vec(value)?);
        self.retry
            .run("overflow.put", StorageError::is_transient, || {
                self.blobs
                    .put(OVERFLOW_CONTAINER, &blob, data.clone(), WritePrecondition::None)
            })
            .await?;
        debug!(queue = %self.name, %blob, bytes = data.len(), "payload overflowed to blob");
        Ok(Envelope::Overflow { blob }.to_bytes()?)
    }

    /// Lease up to `count` messages for `visibility_timeout`.
    ///
    /// Messages already delivered more than `max_trials` times are moved to
    /// quarantine and left out of the result.
    pub async fn pull(
        &self,
        count: usize,
        visibility_timeout: Duration,
        max_trials: u32,
    ) -> QueueResult<Vec<LeasedMessage>> {
        let raw = self
            .retry
            .run("queue.pull", StorageError::is_transient, || {
                self.queues.pull(&self.name, count, visibility_timeout)
            })
            .await?;

        let mut leased = Vec::with_capacity(raw.len());
        for message in raw {
            let id = message.id.clone();
            let message = match self.resolve(message).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    // Left to lease expiry; the rest of the batch is still served.
                    warn!(queue = %self.name, message_id = %id, error = %e, "message not resolved, skipped");
                    continue;
                }
            };
            if message.dequeue_count > max_trials {
                self.quarantine_message(&message, max_trials).await;
                continue;
            }
            leased.push(message);
        }
        Ok(leased)
    }

    /// Resolve the envelope of a raw message, following overflow references.
    async fn resolve(&self, message: RawMessage) -> QueueResult<Option<LeasedMessage>> {
        let (payload, overflow) = match Envelope::from_bytes(&message.body) {
            Ok(Envelope::Inline { payload }) => (Some(payload), None),
            Ok(Envelope::Overflow { blob }) => {
                let stored = self
                    .retry
                    .run("overflow.get", StorageError::is_transient, || {
                        self.blobs.get(OVERFLOW_CONTAINER, &blob)
                    })
                    .await?;
                let Some(stored) = stored else {
                    // The payload is removed only after the work completed.
                    warn!(queue = %self.name, message_id = %message.id, %blob, "overflow payload missing, dropping message");
                    if self.delete_raw(&message.id, &message.receipt).await? {
                        self.clear_evidence(&message.id, message.dequeue_count).await;
                    }
                    return Ok(None);
                };
                match serde_json::from_slice(&stored.data) {
                    Ok(payload) => (Some(payload), Some(blob)),
                    Err(e) => {
                        warn!(queue = %self.name, message_id = %message.id, %blob, error = %e, "corrupt overflow payload");
                        (None, Some(blob))
                    }
                }
            }
            Err(e) => {
                warn!(queue = %self.name, message_id = %message.id, error = %e, "malformed envelope");
                (None, None)
            }
        };

        Ok(Some(LeasedMessage {
            id: message.id,
            receipt: message.receipt,
            dequeue_count: message.dequeue_count,
            leased_until_ms: message.leased_until_ms,
            inserted_at_ms: message.inserted_at_ms,
            payload,
            raw: message.body,
            overflow,
        }))
    }

    /// Move a message to quarantine. Failures leave it in the live queue.
    async fn quarantine_message(&self, message: &LeasedMessage, max_trials: u32) {
        let last_failure = match self.quarantine.evidence(&self.name, &message.id).await {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(queue = %self.name, message_id = %message.id, error = %e, "failure evidence unreadable");
                None
            }
        };
        let record = QuarantineRecord {
            queue: self.name.clone(),
            message_id: message.id.clone(),
            dequeue_count: message.dequeue_count,
            payload: message.record_payload(),
            reason: format!(
                "delivered {} times, max trials {max_trials}",
                message.dequeue_count
            ),
            last_failure,
            quarantined_at_ms: self.clock.now_ms(),
        };

        if let Err(e) = self.quarantine.put(&record).await {
            warn!(queue = %self.name, message_id = %message.id, error = %e, "quarantine transfer failed, message left in place");
            return;
        }
        warn!(
            queue = %self.name,
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
            "message quarantined"
        );

        if let Err(e) = self.delete(message).await {
            warn!(queue = %self.name, message_id = %message.id, error = %e, "quarantined message not removed from queue");
        }
    }

    /// Remove a message permanently.
    ///
    /// Deleting an already-deleted message is a no-op, as is deleting with
    /// a receipt that a later delivery superseded.
    pub async fn delete(&self, message: &LeasedMessage) -> QueueResult<()> {
        let deleted = self.delete_raw(&message.id, &message.receipt).await?;
        if !deleted {
            return Ok(());
        }
        if let Some(ref blob) = message.overflow {
            self.delete_overflow(blob).await;
        }
        self.clear_evidence(&message.id, message.dequeue_count).await;
        Ok(())
    }

    /// Evidence exists only for messages that failed an earlier delivery.
    async fn clear_evidence(&self, id: &str, dequeue_count: u32) {
        if dequeue_count <= 1 {
            return;
        }
        if let Err(e) = self.quarantine.clear_evidence(&self.name, id).await {
            debug!(queue = %self.name, message_id = %id, error = %e, "stale failure evidence left behind");
        }
    }

    /// Returns false when the lease was superseded and the message lives on.
    async fn delete_raw(&self, id: &str, receipt: &Receipt) -> QueueResult<bool> {
        let result = self
            .retry
            .run("queue.delete", StorageError::is_transient, || {
                self.queues.delete(&self.name, id, receipt)
            })
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(StorageError::MessageNotFound(_)) => {
                debug!(queue = %self.name, message_id = %id, "message already deleted");
                Ok(true)
            }
            Err(StorageError::LeaseLost(_)) => {
                warn!(queue = %self.name, message_id = %id, "lease lost before delete, message will be redelivered");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_overflow(&self, blob: &str) {
        let result = self
            .retry
            .run("overflow.delete", StorageError::is_transient, || {
                self.blobs.delete(OVERFLOW_CONTAINER, blob)
            })
            .await;
        if let Err(e) = result {
            warn!(queue = %self.name, %blob, error = %e, "overflow payload not deleted");
        }
    }

    /// Make the message visible again right away.
    pub async fn abandon(&self, message: &LeasedMessage) -> QueueResult<()> {
        let result = self
            .retry
            .run("queue.abandon", StorageError::is_transient, || {
                self.queues.abandon(&self.name, &message.id, &message.receipt)
            })
            .await;
        match result {
            Err(e) if e.is_gone() => {
                debug!(queue = %self.name, message_id = %message.id, error = %e, "abandon of a message no longer leased");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Extend the lease by `extension` from now.
    ///
    /// Fails with `StorageError::Unsupported` on substrates without renewal.
    pub async fn renew_lease(&self, message: &mut LeasedMessage, extension: Duration) -> QueueResult<u64> {
        let until = self
            .retry
            .run("queue.renew", StorageError::is_transient, || {
                self.queues
                    .renew(&self.name, &message.id, &message.receipt, extension)
            })
            .await?;
        message.leased_until_ms = until;
        Ok(until)
    }

    /// Remember why the handler failed on this delivery.
    ///
    /// The latest evidence is copied into the quarantine record if the
    /// message is eventually quarantined.
    pub async fn record_failure(&self, message: &LeasedMessage, evidence: &str) -> QueueResult<()> {
        self.quarantine
            .record_evidence(&self.name, &message.id, evidence)
            .await
    }

    // ── Quarantine operations ──────────────────────────────────────

    /// Records quarantined from this queue.
    pub async fn quarantined(&self) -> QueueResult<Vec<QuarantineRecord>> {
        self.quarantine.list(&self.name).await
    }

    /// Push a quarantined payload back into the queue and drop its record.
    ///
    /// Returns false if no record exists for `message_id`. The restored
    /// message gets a new id and a fresh delivery count.
    pub async fn restore(&self, message_id: &str) -> QueueResult<bool> {
        let Some(record) = self.quarantine.get(&self.name, message_id).await? else {
            return Ok(false);
        };
        self.push_values(vec![record.payload]).await?;
        self.quarantine.discard(&self.name, message_id).await?;
        info!(queue = %self.name, %message_id, "quarantined message restored");
        Ok(true)
    }

    /// Drop a quarantine record for good.
    pub async fn discard(&self, message_id: &str) -> QueueResult<bool> {
        self.quarantine.discard(&self.name, message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MAX_INLINE_MESSAGE_BYTES;
    use leasegrid_core::{Backoff, ManualClock};
    use leasegrid_storage::{MemoryBlobStore, MemoryQueueStore};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        body: String,
    }

    fn job(id: u32) -> Job {
        Job {
            id,
            body: format!("job {id}"),
        }
    }

    struct Fixture {
        queue: LeaseQueue,
        queues: MemoryQueueStore,
        blobs: MemoryBlobStore,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let queues = MemoryQueueStore::new(Arc::new(clock.clone()));
        let blobs = MemoryBlobStore::new();
        let queue = LeaseQueue::new("jobs", Arc::new(queues.clone()), Arc::new(blobs.clone()))
            .with_retry(RetryPolicy::bounded(5, Backoff::Immediate))
            .with_clock(Arc::new(clock.clone()));
        Fixture {
            queue,
            queues,
            blobs,
            clock,
        }
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn push_creates_queue_and_pull_decodes() {
        let f = fixture();
        f.queue.push(&[job(1), job(2)]).await.unwrap();

        let leased = f.queue.pull(10, LEASE, 5).await.unwrap();
        let jobs: Vec<Job> = leased.iter().map(|m| m.decode().unwrap()).collect();
        assert_eq!(jobs, vec![job(1), job(2)]);
        assert!(leased.iter().all(|m| m.dequeue_count == 1));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let f = fixture();
        f.queue.push(&[job(1)]).await.unwrap();
        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();

        f.queue.delete(&leased[0]).await.unwrap();
        f.queue.delete(&leased[0]).await.unwrap();
        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_delete_leaves_redelivered_message() {
        let f = fixture();
        f.queue.push(&[job(1)]).await.unwrap();
        let first = f.queue.pull(1, LEASE, 5).await.unwrap();
        f.clock.advance(LEASE + Duration::from_secs(1));
        let second = f.queue.pull(1, LEASE, 5).await.unwrap();

        f.queue.delete(&first[0]).await.unwrap();
        assert_eq!(f.queue.approximate_count().await.unwrap(), 1);
        f.queue.delete(&second[0]).await.unwrap();
        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abandon_redelivers_immediately() {
        let f = fixture();
        f.queue.push(&[job(1)]).await.unwrap();
        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        f.queue.abandon(&leased[0]).await.unwrap();

        let again = f.queue.pull(1, LEASE, 5).await.unwrap();
        assert_eq!(again[0].dequeue_count, 2);
        f.queue.delete(&again[0]).await.unwrap();
        f.queue.abandon(&again[0]).await.unwrap();
    }

    #[tokio::test]
    async fn renew_updates_lease_expiry() {
        let f = fixture();
        f.queue.push(&[job(1)]).await.unwrap();
        let mut leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        let before = leased[0].leased_until_ms;

        f.clock.advance(Duration::from_secs(20));
        let until = f.queue.renew_lease(&mut leased[0], LEASE).await.unwrap();
        assert_eq!(until, before + 20_000);
        assert_eq!(leased[0].leased_until_ms, until);
    }

    #[tokio::test]
    async fn message_beyond_max_trials_is_quarantined_once() {
        let f = fixture();
        f.queue.push(&[job(9)]).await.unwrap();

        for trial in 1..=2 {
            let leased = f.queue.pull(1, LEASE, 2).await.unwrap();
            assert_eq!(leased[0].dequeue_count, trial);
            f.queue
                .record_failure(&leased[0], &format!("failure {trial}"))
                .await
                .unwrap();
            f.clock.advance(LEASE + Duration::from_secs(1));
        }

        assert!(f.queue.pull(1, LEASE, 2).await.unwrap().is_empty());
        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);

        let records = f.queue.quarantined().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dequeue_count, 3);
        assert_eq!(records[0].last_failure.as_deref(), Some("failure 2"));
        assert_eq!(records[0].payload, serde_json::to_value(job(9)).unwrap());
        assert_eq!(records[0].quarantined_at_ms, f.clock.now_ms());
        assert!(
            f.queue
                .quarantine()
                .evidence("jobs", &records[0].message_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn quarantine_failure_leaves_message_in_place() {
        let f = fixture();
        let queue = f.queue.clone().with_retry(RetryPolicy::no_retry());
        queue.push(&[job(1)]).await.unwrap();
        assert_eq!(queue.pull(1, LEASE, 1).await.unwrap().len(), 1);
        f.clock.advance(LEASE + Duration::from_secs(1));

        // evidence read, then record write: fail both.
        f.blobs.fail_next(2);
        let leased = queue.pull(1, LEASE, 1).await.unwrap();
        assert!(leased.is_empty());
        assert_eq!(queue.approximate_count().await.unwrap(), 1);
        assert!(queue.quarantined().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restore_pushes_payload_back() {
        let f = fixture();
        f.queue.push(&[job(4)]).await.unwrap();
        f.queue.pull(1, LEASE, 0).await.unwrap();
        let id = f.queue.quarantined().await.unwrap()[0].message_id.clone();

        assert!(f.queue.restore(&id).await.unwrap());
        assert!(!f.queue.restore(&id).await.unwrap());
        assert!(f.queue.quarantined().await.unwrap().is_empty());

        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        assert_eq!(leased[0].decode::<Job>().unwrap(), job(4));
        assert_eq!(leased[0].dequeue_count, 1);
    }

    #[tokio::test]
    async fn large_payload_travels_through_overflow_blob() {
        let f = fixture();
        let big = Job {
            id: 1,
            body: "x".repeat(MAX_INLINE_MESSAGE_BYTES + 1),
        };
        f.queue.push(std::slice::from_ref(&big)).await.unwrap();
        assert_eq!(f.blobs.list(OVERFLOW_CONTAINER, "jobs/").await.unwrap().len(), 1);

        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        assert_eq!(leased[0].decode::<Job>().unwrap(), big);

        f.queue.delete(&leased[0]).await.unwrap();
        assert!(f.blobs.list(OVERFLOW_CONTAINER, "jobs/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_overflow_blob_drops_message() {
        let f = fixture();
        let big = Job {
            id: 1,
            body: "x".repeat(MAX_INLINE_MESSAGE_BYTES + 1),
        };
        f.queue.push(&[big]).await.unwrap();
        let name = f.blobs.list(OVERFLOW_CONTAINER, "jobs/").await.unwrap()[0].clone();
        f.blobs.delete(OVERFLOW_CONTAINER, &name).await.unwrap();

        assert!(f.queue.pull(1, LEASE, 5).await.unwrap().is_empty());
        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_overflow_blob_clears_failure_evidence() {
        let f = fixture();
        let big = Job {
            id: 1,
            body: "x".repeat(MAX_INLINE_MESSAGE_BYTES + 1),
        };
        f.queue.push(&[big]).await.unwrap();
        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        f.queue.record_failure(&leased[0], "db down").await.unwrap();
        f.clock.advance(LEASE + Duration::from_secs(1));

        let name = f.blobs.list(OVERFLOW_CONTAINER, "jobs/").await.unwrap()[0].clone();
        f.blobs.delete(OVERFLOW_CONTAINER, &name).await.unwrap();

        assert!(f.queue.pull(1, LEASE, 5).await.unwrap().is_empty());
        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);
        assert!(
            f.queue
                .quarantine()
                .evidence("jobs", &leased[0].id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unreadable_overflow_skips_only_that_message() {
        let f = fixture();
        let queue = f.queue.clone().with_retry(RetryPolicy::no_retry());
        let big = Job {
            id: 1,
            body: "x".repeat(MAX_INLINE_MESSAGE_BYTES + 1),
        };
        queue.push(&[big.clone(), job(2)]).await.unwrap();

        f.blobs.fail_next(1);
        let leased = queue.pull(10, LEASE, 5).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].decode::<Job>().unwrap(), job(2));

        f.clock.advance(LEASE + Duration::from_secs(1));
        let again = queue.pull(10, LEASE, 5).await.unwrap();
        let jobs: Vec<Job> = again.iter().map(|m| m.decode().unwrap()).collect();
        assert!(jobs.contains(&big));
    }

    #[tokio::test]
    async fn malformed_body_fails_decode_only() {
        let f = fixture();
        f.queue.ensure_exists().await.unwrap();
        f.queues
            .push("jobs", vec![Bytes::from_static(b"not json")])
            .await
            .unwrap();

        let leased = f.queue.pull(1, LEASE, 5).await.unwrap();
        assert!(leased[0].payload().is_none());
        assert!(matches!(leased[0].decode::<Job>(), Err(QueueError::Serialize(_))));
    }

    #[tokio::test]
    async fn transient_faults_are_retried() {
        let f = fixture();
        f.queue.push(&[job(1)]).await.unwrap();
        f.queues.fail_next(3);
        assert_eq!(f.queue.pull(1, LEASE, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_queue_is_a_distinct_error() {
        let f = fixture();
        let err = f.queue.pull(1, LEASE, 5).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueMissing(ref q) if q == "jobs"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn clear_drops_messages_and_overflow() {
        let f = fixture();
        let big = Job {
            id: 1,
            body: "x".repeat(MAX_INLINE_MESSAGE_BYTES + 1),
        };
        f.queue.push(&[job(1), big]).await.unwrap();
        f.queue.clear().await.unwrap();

        assert_eq!(f.queue.approximate_count().await.unwrap(), 0);
        assert!(f.blobs.list(OVERFLOW_CONTAINER, "jobs/").await.unwrap().is_empty());
    }
}
