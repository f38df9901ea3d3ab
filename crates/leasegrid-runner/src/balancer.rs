//! Balancer: multiplexes every registered runner over one dispatch loop.
//!
//! Each pass walks the registry in name order and calls `run_once` on every
//! enabled runner. A pass where nobody found work sleeps an exponentially
//! growing idle delay; any work resets it.
//!
//! Runner failures, panics included, are logged and the loop continues.
//! Only a [`RestartRequested`] ends [`Balancer::execute`] with an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use leasegrid_core::config::BalancerSection;
use leasegrid_core::{ConfigError, ConfigResult, parse_duration};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::restart::{RestartDetector, RestartRequested};
use crate::service::Runner;
use crate::state::RunnerStateStore;

/// Timing knobs of the balancer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerConfig {
    /// First idle delay after a pass without work.
    pub idle_backoff_min: Duration,
    /// Ceiling for the idle delay. Equal to the minimum for a fixed delay.
    pub idle_backoff_max: Duration,
    /// Minimum time between reloads of persisted runner states.
    pub state_refresh: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_min: Duration::from_secs(1),
            idle_backoff_max: Duration::from_secs(8),
            state_refresh: Duration::from_secs(30),
        }
    }
}

impl BalancerConfig {
    /// Build from the `[balancer]` config section, defaulting missing keys.
    pub fn from_section(section: Option<&BalancerSection>) -> ConfigResult<Self> {
        let mut config = Self::default();
        let Some(section) = section else {
            return Ok(config);
        };
        if let Some(ref min) = section.idle_backoff_min {
            config.idle_backoff_min = parse_duration(min)?;
        }
        if let Some(ref max) = section.idle_backoff_max {
            config.idle_backoff_max = parse_duration(max)?;
        }
        if let Some(ref refresh) = section.state_refresh {
            config.state_refresh = parse_duration(refresh)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        // A zero minimum never grows and would spin on empty queues.
        if self.idle_backoff_min.is_zero() {
            return Err(ConfigError::Invalid("idle_backoff_min must be greater than zero".to_string()));
        }
        if self.idle_backoff_min > self.idle_backoff_max {
            return Err(ConfigError::Invalid(format!(
                "idle_backoff_min ({:?}) exceeds idle_backoff_max ({:?})",
                self.idle_backoff_min, self.idle_backoff_max
            )));
        }
        Ok(())
    }
}

/// Exponential idle delay: min, 2·min, 4·min, … capped at max.
#[derive(Debug)]
struct IdleBackoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl IdleBackoff {
    fn new(config: &BalancerConfig) -> Self {
        Self {
            min: config.idle_backoff_min,
            max: config.idle_backoff_max,
            next: config.idle_backoff_min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Enabled flags cached between state refreshes.
#[derive(Debug, Default)]
struct StateCache {
    enabled: BTreeMap<String, bool>,
    refreshed_at: Option<Instant>,
}

/// Runs registered runners until shutdown or a restart request.
pub struct Balancer {
    runners: Arc<RwLock<BTreeMap<String, Arc<dyn Runner>>>>,
    states: Option<RunnerStateStore>,
    detector: Option<Arc<dyn RestartDetector>>,
    config: BalancerConfig,
    cache: Mutex<StateCache>,
}

impl Balancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            runners: Arc::new(RwLock::new(BTreeMap::new())),
            states: None,
            detector: None,
            config,
            cache: Mutex::new(StateCache::default()),
        }
    }

    /// Persist and honor runner enable/disable states.
    pub fn with_state_store(mut self, states: RunnerStateStore) -> Self {
        self.states = Some(states);
        self
    }

    pub fn with_restart_detector(mut self, detector: Arc<dyn RestartDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    // ── Registry ───────────────────────────────────────────────────

    /// Initialize `runner` and add it to the rotation.
    pub async fn register(&self, runner: Arc<dyn Runner>) -> RunnerResult<()> {
        let name = runner.name().to_string();
        if self.runners.read().await.contains_key(&name) {
            return Err(RunnerError::Duplicate(name));
        }
        runner.initialize().await?;

        let mut runners = self.runners.write().await;
        if runners.contains_key(&name) {
            return Err(RunnerError::Duplicate(name));
        }
        runners.insert(name.clone(), runner);
        info!(runner = %name, "runner registered");
        Ok(())
    }

    /// Remove a runner from the rotation. In-flight work of that runner
    /// finishes or resurfaces through lease expiry.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.runners.write().await.remove(name).is_some();
        if removed {
            self.cache.lock().await.enabled.remove(name);
            info!(runner = %name, "runner unregistered");
        }
        removed
    }

    pub async fn runner_names(&self) -> Vec<String> {
        self.runners.read().await.keys().cloned().collect()
    }

    // ── Loop ───────────────────────────────────────────────────────

    /// Run passes until `shutdown` flips to true or a restart is requested.
    pub async fn execute(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RestartRequested> {
        let mut backoff = IdleBackoff::new(&self.config);
        let registered = self.runners.read().await.len();
        info!(runners = registered, "balancer started");

        loop {
            if *shutdown.borrow() {
                info!("balancer stopping");
                return Ok(());
            }

            if self.run_pass().await? {
                backoff.reset();
                tokio::task::yield_now().await;
                continue;
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "no work, idling");
            // A dropped sender counts as shutdown; a flip is seen at the top.
            let sender_gone = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if sender_gone {
                info!("balancer stopping");
                return Ok(());
            }
        }
    }

    /// One pass over the registry. Returns true if any runner did work.
    pub async fn run_pass(&self) -> Result<bool, RestartRequested> {
        if let Some(ref detector) = self.detector {
            if let Some(restart) = detector.check().await {
                warn!(reason = %restart.reason, "restart detected");
                return Err(restart);
            }
        }

        let runners: Vec<(String, Arc<dyn Runner>)> = self
            .runners
            .read()
            .await
            .iter()
            .map(|(name, runner)| (name.clone(), runner.clone()))
            .collect();
        let enabled = self.enabled(&runners).await;

        let mut worked = false;
        for (name, runner) in runners {
            if !enabled.get(&name).copied().unwrap_or_else(|| runner.auto_start()) {
                continue;
            }
            if run_guarded(&name, runner).await? {
                worked = true;
            }
        }
        Ok(worked)
    }

    /// Enabled flags for `runners`, reloading persisted state when due.
    async fn enabled(&self, runners: &[(String, Arc<dyn Runner>)]) -> BTreeMap<String, bool> {
        let mut cache = self.cache.lock().await;
        let Some(ref states) = self.states else {
            return runners
                .iter()
                .map(|(name, runner)| (name.clone(), runner.auto_start()))
                .collect();
        };

        let stale = cache
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= self.config.state_refresh);
        let unknown = runners.iter().any(|(name, _)| !cache.enabled.contains_key(name));
        if stale || unknown {
            let defaults: Vec<(String, bool)> = runners
                .iter()
                .map(|(name, runner)| (name.clone(), runner.auto_start()))
                .collect();
            match states.ensure(&defaults).await {
                Ok(table) => {
                    cache.enabled = table
                        .into_iter()
                        .map(|(name, state)| (name, state.is_started()))
                        .collect();
                    cache.refreshed_at = Some(Instant::now());
                    debug!(runners = cache.enabled.len(), "runner states refreshed");
                }
                Err(e) => warn!(error = %e, "runner states not refreshed, keeping previous"),
            }
        }
        cache.enabled.clone()
    }
}

/// Run one `run_once` on its own task so a panic stays contained.
async fn run_guarded(name: &str, runner: Arc<dyn Runner>) -> Result<bool, RestartRequested> {
    let handle = tokio::spawn(async move { runner.run_once().await });
    match handle.await {
        Ok(Ok(worked)) => Ok(worked),
        Ok(Err(RunnerError::Restart(restart))) => {
            warn!(runner = %name, reason = %restart.reason, "runner requested restart");
            Err(restart)
        }
        Ok(Err(e)) => {
            error!(runner = %name, error = %e, "runner failed");
            Ok(false)
        }
        Err(e) if e.is_panic() => {
            error!(runner = %name, "runner panicked");
            Ok(false)
        }
        Err(e) => {
            error!(runner = %name, error = %e, "runner task cancelled");
            Ok(false)
        }
    }
}
