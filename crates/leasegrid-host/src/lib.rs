//! leasegrid-host: wiring a leasegrid process together.
//!
//! ```text
//! init_tracing()
//! LeasegridConfig::from_file("leasegrid.toml")
//!   → Host::open(config, queue substrate)       (redb blob store under [storage].data_dir)
//!     → register_service(settings, handler)     ([runners.<queue>] overrides applied)
//!     → run()                                   (ctrl-c → HostExit::Shutdown,
//!                                                restart  → HostExit::Restart)
//! ```
//!
//! A `HostExit::Restart` tells the supervisor to start a fresh process.

pub mod host;
pub mod telemetry;

pub use host::{BLOB_FILE, CONFIG_CONTAINER, Host, HostExit};
pub use telemetry::{DEFAULT_FILTER, init_tracing};
