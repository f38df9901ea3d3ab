//! leasegrid-storage: the storage substrate contracts leasegrid builds on.
//!
//! The substrate only offers weak primitives:
//!
//! - [`QueueStore`]: at-least-once delivery with a visibility timeout and a
//!   per-message dequeue counter.
//! - [`BlobStore`]: named blobs with an opaque version token and conditional
//!   writes.
//!
//! Everything stronger (quarantine, exactly-once effects, atomic counters) is
//! layered on top in the other crates.
//!
//! # Backends
//!
//! ```text
//! MemoryQueueStore  ── lease expiry driven by an injected Clock
//! MemoryBlobStore   ── numeric versions, RwLock-guarded map
//! RedbBlobStore     ── persistent blobs, conditional checks inside one write txn
//! ```

pub mod blob;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redb_store;
pub mod tables;

pub use blob::{Blob, BlobStore, Version, WritePrecondition, WriteResult};
pub use error::{StorageError, StorageResult};
pub use memory::{MemoryBlobStore, MemoryQueueStore};
pub use queue::{QueueStore, RawMessage, Receipt};
pub use redb_store::RedbBlobStore;
