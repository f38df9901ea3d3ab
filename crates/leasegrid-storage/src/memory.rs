//! In-memory substrates.
//!
//! Both stores are `Clone` and share state between clones, so several
//! simulated process instances can run against the same queues and blobs.
//! Lease expiry is evaluated against the injected [`Clock`]: advancing a
//! `ManualClock` past a lease makes the message visible again on the next
//! pull, exactly as a real visibility timeout would.
//!
//! `fail_next(n)` makes the next `n` calls fail with `Throttled`, which
//! exercises the transparent retry paths above the substrate.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use leasegrid_core::{Clock, SystemClock};
use tracing::debug;

use crate::blob::{Blob, BlobStore, Version, WritePrecondition, WriteResult};
use crate::error::{StorageError, StorageResult};
use crate::queue::{QueueStore, RawMessage, Receipt};

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("lock poisoned".to_string())
}

/// Consumes one injected fault if any are pending.
fn take_fault(pending: &AtomicU32, op: &str) -> StorageResult<()> {
    let took = pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if took {
        return Err(StorageError::Throttled(format!("injected fault on {op}")));
    }
    Ok(())
}

// ── Queues ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: Bytes,
    dequeue_count: u32,
    inserted_at_ms: u64,
    visible_at_ms: u64,
    /// Receipt of the current lease, if leased.
    receipt: Option<Receipt>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Insertion sequence → message; iteration order approximates FIFO.
    messages: BTreeMap<u64, StoredMessage>,
}

impl QueueState {
    fn find_mut(&mut self, id: &str) -> Option<(u64, &mut StoredMessage)> {
        self.messages
            .iter_mut()
            .find(|(_, m)| m.id == id)
            .map(|(seq, m)| (*seq, m))
    }
}

/// Checks the receipt of a located message, distinguishing gone from stale.
///
/// A receipt stays valid after its lease expires until the message is
/// delivered again.
fn check_lease(
    found: Option<(u64, &mut StoredMessage)>,
    id: &str,
    receipt: &Receipt,
) -> StorageResult<u64> {
    let (seq, message) = found.ok_or_else(|| StorageError::MessageNotFound(id.to_string()))?;
    match message.receipt {
        Some(ref current) if current == receipt => Ok(seq),
        _ => Err(StorageError::LeaseLost(format!("{id} ({receipt})"))),
    }
}

/// Shared in-memory queue substrate.
#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    clock: Arc<dyn Clock>,
    next_seq: Arc<AtomicU64>,
    faults: Arc<AtomicU32>,
}

impl MemoryQueueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            clock,
            next_seq: Arc::new(AtomicU64::new(1)),
            faults: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.faults.store(n, Ordering::SeqCst);
    }

    /// Dequeue counts of every stored message, in queue order (for tests
    /// and diagnostics).
    pub fn dequeue_counts(&self, queue: &str) -> Vec<u32> {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| {
                queues
                    .get(queue)
                    .map(|q| q.messages.values().map(|m| m.dequeue_count).collect())
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn create_queue(&self, queue: &str) -> StorageResult<bool> {
        take_fault(&self.faults, "create_queue")?;
        let mut queues = self.queues.lock().map_err(poisoned)?;
        if queues.contains_key(queue) {
            return Ok(false);
        }
        queues.insert(queue.to_string(), QueueState::default());
        debug!(%queue, "queue created");
        Ok(true)
    }

    async fn delete_queue(&self, queue: &str) -> StorageResult<bool> {
        take_fault(&self.faults, "delete_queue")?;
        let mut queues = self.queues.lock().map_err(poisoned)?;
        Ok(queues.remove(queue).is_some())
    }

    async fn push(&self, queue: &str, bodies: Vec<Bytes>) -> StorageResult<()> {
        take_fault(&self.faults, "push")?;
        let now = self.clock.now_ms();
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;

        for body in bodies {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            state.messages.insert(
                seq,
                StoredMessage {
                    id: format!("msg-{seq}"),
                    body,
                    dequeue_count: 0,
                    inserted_at_ms: now,
                    visible_at_ms: now,
                    receipt: None,
                },
            );
        }
        Ok(())
    }

    async fn pull(
        &self,
        queue: &str,
        max_count: usize,
        visibility_timeout: Duration,
    ) -> StorageResult<Vec<RawMessage>> {
        take_fault(&self.faults, "pull")?;
        let now = self.clock.now_ms();
        let leased_until_ms = now.saturating_add(visibility_timeout.as_millis() as u64);
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;

        let mut leased = Vec::new();
        for message in state.messages.values_mut() {
            if leased.len() >= max_count {
                break;
            }
            if message.visible_at_ms > now {
                continue;
            }
            message.dequeue_count += 1;
            message.visible_at_ms = leased_until_ms;
            let receipt = Receipt(format!("{}#{}", message.id, message.dequeue_count));
            message.receipt = Some(receipt.clone());
            leased.push(RawMessage {
                id: message.id.clone(),
                receipt,
                dequeue_count: message.dequeue_count,
                leased_until_ms,
                inserted_at_ms: message.inserted_at_ms,
                body: message.body.clone(),
            });
        }
        Ok(leased)
    }

    async fn delete(&self, queue: &str, id: &str, receipt: &Receipt) -> StorageResult<()> {
        take_fault(&self.faults, "delete")?;
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;
        let seq = check_lease(state.find_mut(id), id, receipt)?;
        state.messages.remove(&seq);
        Ok(())
    }

    async fn abandon(&self, queue: &str, id: &str, receipt: &Receipt) -> StorageResult<()> {
        take_fault(&self.faults, "abandon")?;
        let now = self.clock.now_ms();
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;
        let seq = check_lease(state.find_mut(id), id, receipt)?;
        if let Some(message) = state.messages.get_mut(&seq) {
            message.visible_at_ms = now;
            message.receipt = None;
        }
        Ok(())
    }

    async fn renew(
        &self,
        queue: &str,
        id: &str,
        receipt: &Receipt,
        extension: Duration,
    ) -> StorageResult<u64> {
        take_fault(&self.faults, "renew")?;
        let now = self.clock.now_ms();
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;
        let seq = check_lease(state.find_mut(id), id, receipt)?;
        let until = now.saturating_add(extension.as_millis() as u64);
        if let Some(message) = state.messages.get_mut(&seq) {
            message.visible_at_ms = until;
        }
        Ok(until)
    }

    async fn approximate_count(&self, queue: &str) -> StorageResult<usize> {
        take_fault(&self.faults, "approximate_count")?;
        let queues = self.queues.lock().map_err(poisoned)?;
        queues
            .get(queue)
            .map(|q| q.messages.len())
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))
    }

    async fn clear(&self, queue: &str) -> StorageResult<()> {
        take_fault(&self.faults, "clear")?;
        let mut queues = self.queues.lock().map_err(poisoned)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;
        state.messages.clear();
        Ok(())
    }
}

// ── Blobs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    version: u64,
}

/// Shared in-memory blob substrate with numeric versions.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), StoredBlob>>>,
    /// Versions keep increasing across delete/recreate so a stale token
    /// never matches a new blob.
    next_version: Arc<AtomicU64>,
    faults: Arc<AtomicU32>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.faults.store(n, Ordering::SeqCst);
    }
}

fn key(container: &str, name: &str) -> (String, String) {
    (container.to_string(), name.to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, container: &str, name: &str) -> StorageResult<Option<Blob>> {
        take_fault(&self.faults, "get")?;
        let blobs = self.blobs.read().map_err(poisoned)?;
        Ok(blobs.get(&key(container, name)).map(|b| Blob {
            data: b.data.clone(),
            version: Version(b.version.to_string()),
        }))
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult> {
        take_fault(&self.faults, "put")?;
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        let k = key(container, name);
        let current = blobs.get(&k).map(|b| Version(b.version.to_string()));

        let allowed = match precondition {
            WritePrecondition::DoesNotExist => current.is_none(),
            WritePrecondition::MatchesVersion(ref expected) => current.as_ref() == Some(expected),
            WritePrecondition::None => true,
        };
        if !allowed {
            return Ok(WriteResult::PreconditionFailed { current });
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        blobs.insert(k, StoredBlob { data, version });
        Ok(WriteResult::Written {
            version: Version(version.to_string()),
        })
    }

    async fn delete(&self, container: &str, name: &str) -> StorageResult<bool> {
        take_fault(&self.faults, "delete")?;
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        Ok(blobs.remove(&key(container, name)).is_some())
    }

    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>> {
        take_fault(&self.faults, "list")?;
        let blobs = self.blobs.read().map_err(poisoned)?;
        let mut names: Vec<String> = blobs
            .keys()
            .filter(|(c, n)| c == container && n.starts_with(prefix))
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasegrid_core::ManualClock;

    fn queue_store() -> (MemoryQueueStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryQueueStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn leased_message_is_hidden_until_expiry() {
        let (store, clock) = queue_store();
        store.create_queue("jobs").await.unwrap();
        store.push("jobs", vec![Bytes::from_static(b"a")]).await.unwrap();

        let first = store.pull("jobs", 10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dequeue_count, 1);
        assert!(store.pull("jobs", 10, Duration::from_secs(30)).await.unwrap().is_empty());

        clock.advance(Duration::from_secs(31));
        let again = store.pull("jobs", 10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].dequeue_count, 2);
        assert_ne!(again[0].receipt, first[0].receipt);
    }

    #[tokio::test]
    async fn stale_receipt_cannot_delete() {
        let (store, clock) = queue_store();
        store.create_queue("jobs").await.unwrap();
        store.push("jobs", vec![Bytes::from_static(b"a")]).await.unwrap();

        let first = store.pull("jobs", 1, Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(6));
        let second = store.pull("jobs", 1, Duration::from_secs(5)).await.unwrap();

        let err = store
            .delete("jobs", &first[0].id, &first[0].receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LeaseLost(_)));

        store
            .delete("jobs", &second[0].id, &second[0].receipt)
            .await
            .unwrap();
        let gone = store
            .delete("jobs", &second[0].id, &second[0].receipt)
            .await
            .unwrap_err();
        assert!(matches!(gone, StorageError::MessageNotFound(_)));
        assert_eq!(store.approximate_count("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn abandon_makes_message_visible_immediately() {
        let (store, _clock) = queue_store();
        store.create_queue("jobs").await.unwrap();
        store.push("jobs", vec![Bytes::from_static(b"a")]).await.unwrap();

        let leased = store.pull("jobs", 1, Duration::from_secs(60)).await.unwrap();
        store
            .abandon("jobs", &leased[0].id, &leased[0].receipt)
            .await
            .unwrap();
        let again = store.pull("jobs", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(again[0].dequeue_count, 2);
    }

    #[tokio::test]
    async fn renew_extends_lease() {
        let (store, clock) = queue_store();
        store.create_queue("jobs").await.unwrap();
        store.push("jobs", vec![Bytes::from_static(b"a")]).await.unwrap();

        let leased = store.pull("jobs", 1, Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));
        store
            .renew("jobs", &leased[0].id, &leased[0].receipt, Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(8));
        assert!(store.pull("jobs", 1, Duration::from_secs(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_queue_is_permanent() {
        let (store, _clock) = queue_store();
        let err = store.pull("nope", 1, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::QueueNotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn injected_faults_are_transient_and_consumed() {
        let (store, _clock) = queue_store();
        store.create_queue("jobs").await.unwrap();
        store.fail_next(2);
        assert!(store.approximate_count("jobs").await.unwrap_err().is_transient());
        assert!(store.approximate_count("jobs").await.is_err());
        assert_eq!(store.approximate_count("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blob_preconditions() {
        let store = MemoryBlobStore::new();
        let created = store
            .put("c", "n", Bytes::from_static(b"1"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        let WriteResult::Written { version } = created else {
            panic!("expected write");
        };

        let again = store
            .put("c", "n", Bytes::from_static(b"2"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(!again.is_written());

        let updated = store
            .put("c", "n", Bytes::from_static(b"3"), WritePrecondition::MatchesVersion(version.clone()))
            .await
            .unwrap();
        assert!(updated.is_written());

        let stale = store
            .put("c", "n", Bytes::from_static(b"4"), WritePrecondition::MatchesVersion(version))
            .await
            .unwrap();
        assert!(matches!(stale, WriteResult::PreconditionFailed { current: Some(_) }));

        let blob = store.get("c", "n").await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from_static(b"3"));
    }

    #[tokio::test]
    async fn blob_versions_never_repeat_after_recreate() {
        let store = MemoryBlobStore::new();
        store
            .put("c", "n", Bytes::from_static(b"1"), WritePrecondition::None)
            .await
            .unwrap();
        let old = store.get("c", "n").await.unwrap().unwrap().version;
        assert!(store.delete("c", "n").await.unwrap());
        store
            .put("c", "n", Bytes::from_static(b"1"), WritePrecondition::None)
            .await
            .unwrap();
        let stale = store
            .put("c", "n", Bytes::from_static(b"2"), WritePrecondition::MatchesVersion(old))
            .await
            .unwrap();
        assert!(!stale.is_written());
    }

    #[tokio::test]
    async fn blob_list_filters_container_and_prefix() {
        let store = MemoryBlobStore::new();
        for (c, n) in [("a", "x/2"), ("a", "x/1"), ("a", "y/1"), ("b", "x/3")] {
            store
                .put(c, n, Bytes::new(), WritePrecondition::None)
                .await
                .unwrap();
        }
        assert_eq!(store.list("a", "x/").await.unwrap(), vec!["x/1", "x/2"]);
        assert!(!store.delete("a", "zzz").await.unwrap());
    }
}
