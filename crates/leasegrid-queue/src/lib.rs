//! leasegrid-queue: a lease-based queue over an at-least-once substrate.
//!
//! [`LeaseQueue`] adds three things the raw substrate lacks:
//!
//! - **Poison quarantine**: on pull, any message delivered more than
//!   `max_trials` times is moved to the [`QuarantineStore`] instead of being
//!   returned. The check is lazy because the substrate only exposes a
//!   counter, not a delivery hook.
//! - **Transparent retries**: transient substrate failures are retried under
//!   a [`RetryPolicy`](leasegrid_core::RetryPolicy); permanent ones surface as
//!   typed [`QueueError`]s.
//! - **Overflow payloads**: payloads too large for a queue message travel
//!   through a blob, see [`envelope`].
//!
//! # Architecture
//!
//! ```text
//! LeaseQueue
//!   ├── QueueStore (push / pull / delete / abandon / renew)
//!   ├── BlobStore  (overflow payloads)
//!   └── QuarantineStore
//!         ├── leasegrid-failing-messages/{queue}/{id}   (records)
//!         └── leasegrid-failure-evidence/{queue}/{id}   (last handler failure)
//! ```

pub mod envelope;
pub mod error;
pub mod lease_queue;
pub mod quarantine;

pub use envelope::{MAX_INLINE_MESSAGE_BYTES, OVERFLOW_CONTAINER};
pub use error::{QueueError, QueueResult};
pub use lease_queue::{LeaseQueue, LeasedMessage};
pub use quarantine::{QuarantineRecord, QuarantineStore};
