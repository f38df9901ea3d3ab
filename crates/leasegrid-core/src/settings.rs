//! Runner registration settings.
//!
//! A registration binds a queue to a handler together with the dispatch
//! parameters below. Settings are validated once and never change while the
//! runner is registered.

use std::time::Duration;

use crate::config::RunnerOverride;
use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// Largest batch the queue substrate hands out in a single pull.
pub const MAX_BATCH_SIZE: usize = 32;

/// Dispatch parameters for one queue-bound runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Queue the runner pulls from; doubles as the runner name.
    pub queue: String,
    /// Messages pulled per dispatch cycle.
    pub batch_size: usize,
    /// How long a pulled message stays hidden from other pullers.
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a message is quarantined.
    pub max_trials: u32,
    /// Initial enabled state when the runner is first seen.
    pub auto_start: bool,
}

impl RunnerSettings {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            batch_size: 1,
            visibility_timeout: Duration::from_secs(300),
            max_trials: 5,
            auto_start: true,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_trials(mut self, max_trials: u32) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Apply a `[runners.<queue>]` override from the config file.
    pub fn apply(mut self, over: &RunnerOverride) -> ConfigResult<Self> {
        if let Some(batch_size) = over.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(ref timeout) = over.visibility_timeout {
            self.visibility_timeout = parse_duration(timeout)?;
        }
        if let Some(max_trials) = over.max_trials {
            self.max_trials = max_trials;
        }
        if let Some(auto_start) = over.auto_start {
            self.auto_start = auto_start;
        }
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_queue_name(&self.queue)?;
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "{}: batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.queue, self.batch_size
            )));
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "{}: visibility timeout must be positive",
                self.queue
            )));
        }
        if self.max_trials == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: max trials must be at least 1",
                self.queue
            )));
        }
        Ok(())
    }
}

/// Queue names: 3-63 chars of lowercase ASCII, digits, and single hyphens,
/// starting and ending with an alphanumeric.
pub fn validate_queue_name(name: &str) -> ConfigResult<()> {
    let invalid = |why: &str| ConfigError::Invalid(format!("queue name {name:?}: {why}"));

    if !(3..=63).contains(&name.len()) {
        return Err(invalid("length must be between 3 and 63"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("only lowercase letters, digits, and '-' are allowed"));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("hyphens must separate alphanumeric runs"));
    }
    Ok(())
}
