//! leasegrid-core: shared building blocks for the leasegrid workspace.
//!
//! - [`retry`]: failure classification plus backoff shaping, used by every
//!   component that talks to the storage substrate.
//! - [`clock`]: injectable time source so lease expiry can be driven in tests
//!   without wall-clock sleeps.
//! - [`settings`]: immutable runner registration settings.
//! - [`config`]: `leasegrid.toml` parsing.

pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod retry;
pub mod settings;

pub use clock::{Clock, ManualClock, SystemClock, epoch_ms};
pub use config::LeasegridConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use retry::{Backoff, RetryPolicy};
pub use settings::RunnerSettings;
