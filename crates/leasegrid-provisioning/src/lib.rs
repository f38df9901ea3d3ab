//! leasegrid-provisioning: scaling the worker fleet through a management API.
//!
//! # Architecture
//!
//! ```text
//! Provisioning::set_worker_count(n)
//!   → RetryPolicy (transient management errors only)
//!     → ChannelCache::acquire(endpoint)
//!       → cached channel             → call ManagementApi
//!       → none cached                → ManagementConnector::connect, cache it
//!     → transport failure            → guard.fault() evicts the channel, retry reconnects
//! ```
//!
//! The channel cache is the only piece of process-local shared state in
//! leasegrid; it is an owned value behind a coarse mutex, handed out
//! through scoped guards.

pub mod api;
pub mod channel;
pub mod error;
pub mod provisioning;

pub use api::{ManagementApi, ManagementConnector};
pub use channel::{ChannelCache, ChannelGuard, ChannelStats};
pub use error::{ManagementError, ManagementResult};
pub use provisioning::Provisioning;
