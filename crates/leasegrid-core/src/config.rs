//! leasegrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;
use crate::error::ConfigResult;
use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeasegridConfig {
    pub balancer: Option<BalancerSection>,
    pub retry: Option<RetrySection>,
    pub storage: Option<StorageSection>,
    pub runners: Option<HashMap<String, RunnerOverride>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancerSection {
    pub idle_backoff_min: Option<String>,
    pub idle_backoff_max: Option<String>,
    pub state_refresh: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub backoff_cap: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory for the on-disk blob store.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerOverride {
    pub batch_size: Option<usize>,
    pub visibility_timeout: Option<String>,
    pub max_trials: Option<u32>,
    pub auto_start: Option<bool>,
}

impl LeasegridConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Override for the runner bound to `queue`, if any.
    pub fn runner_override(&self, queue: &str) -> Option<&RunnerOverride> {
        self.runners.as_ref()?.get(queue)
    }

    /// Retry policy for transient substrate errors, with `[retry]` applied.
    pub fn transient_retry_policy(&self) -> ConfigResult<RetryPolicy> {
        let defaults = RetryPolicy::transient_server_errors();
        let Some(ref retry) = self.retry else {
            return Ok(defaults);
        };

        let max_retries = retry
            .max_retries
            .or(defaults.max_retries())
            .unwrap_or_default();
        let cap = match retry.backoff_cap {
            Some(ref cap) => parse_duration(cap)?,
            None => Duration::from_secs(300),
        };
        Ok(RetryPolicy::bounded(
            max_retries,
            Backoff::Quadratic {
                unit: Duration::from_secs(1),
                cap,
            },
        ))
    }

    /// Scaffold a config with every section filled with defaults.
    pub fn scaffold() -> Self {
        LeasegridConfig {
            balancer: Some(BalancerSection {
                idle_backoff_min: Some("1s".to_string()),
                idle_backoff_max: Some("8s".to_string()),
                state_refresh: Some("30s".to_string()),
            }),
            retry: Some(RetrySection {
                max_retries: Some(30),
                backoff_cap: Some("5m".to_string()),
            }),
            storage: Some(StorageSection {
                data_dir: Some(PathBuf::from("/var/lib/leasegrid")),
            }),
            runners: None,
        }
    }
}
