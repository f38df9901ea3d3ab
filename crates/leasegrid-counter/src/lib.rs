//! leasegrid-counter: a counter shared by many process instances.
//!
//! The substrate has no atomic increment, so [`AtomicBlobCounter`] builds
//! one from a read followed by a write conditioned on the version read:
//!
//! ```text
//! get ── (value, v7) ── put(value + Δ, if version == v7)
//!                          ├── written      → committed value
//!                          ├── conflict     → re-read, retry (short linear backoff)
//!                          ├── timed out    → re-read: our op id → committed, else retry
//!                          └── blob missing → CounterError::NotFound
//! ```
//!
//! [`FanIn`] uses it to detect that the last of N work items completed,
//! without any coordinator: exactly one completion moves the counter from
//! positive to zero or below.

pub mod counter;
pub mod error;
pub mod fan_in;

pub use counter::{AtomicBlobCounter, COUNTER_CONTAINER};
pub use error::{CounterError, CounterResult};
pub use fan_in::{Completion, FanIn};
