//! leasegrid-runner: dispatch loops over lease queues.
//!
//! A [`ServiceRunner`] binds one queue to a typed [`MessageHandler`] and
//! turns at-least-once delivery into exactly-once-effect handling: a message
//! is deleted only after its handler succeeded, and a message failing on
//! every allowed delivery ends up in quarantine. The [`Balancer`] drives all
//! registered runners on a single loop with idle backoff.
//!
//! # Architecture
//!
//! ```text
//! Balancer::execute(shutdown)
//!   ├── RestartDetector::check()           (once per pass)
//!   ├── RunnerStateStore                   (leasegrid-services/states)
//!   └── for runner in registry (name order, enabled only)
//!         ├── ServiceRunner<T, H>::run_once
//!         │     └── LeaseQueue::pull → H::handle → delete | abandon | expire
//!         └── ScheduledRunner<S>::run_once
//!               └── claim leasegrid-schedules/{name} → S::run
//! ```
//!
//! `RestartRequested` is the only error that leaves the loop; the host
//! restarts the process when it sees one.

pub mod balancer;
pub mod error;
pub mod handler;
pub mod restart;
pub mod scheduled;
pub mod service;
pub mod state;

pub use balancer::{Balancer, BalancerConfig};
pub use error::{RunnerError, RunnerResult};
pub use handler::{Delivery, HandlerError, HandlerResult, MessageHandler};
pub use restart::{BlobVersionWatch, RestartDetector, RestartRequested, RestartSwitch};
pub use scheduled::{ScheduledRunner, ScheduledTask};
pub use service::{Runner, ServiceRunner};
pub use state::{RunnerState, RunnerStateStore};
