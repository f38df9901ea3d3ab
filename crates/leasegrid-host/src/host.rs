//! Process host: owns the substrates and the balancer.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use leasegrid_core::{LeasegridConfig, RetryPolicy, RunnerSettings};
use leasegrid_queue::LeaseQueue;
use leasegrid_runner::{
    Balancer, BalancerConfig, BlobVersionWatch, MessageHandler, RestartDetector, RestartRequested, Runner,
    RunnerStateStore, ServiceRunner,
};
use leasegrid_storage::{BlobStore, QueueStore, RedbBlobStore};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Blob database file inside `[storage].data_dir`.
pub const BLOB_FILE: &str = "blobs.redb";

/// Container holding configuration blobs watched for restarts.
pub const CONFIG_CONTAINER: &str = "leasegrid-config";

/// Why [`Host::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostExit {
    /// Shutdown was requested; the process should exit.
    Shutdown,
    /// A restart was requested; the supervisor should start a new process.
    Restart(RestartRequested),
}

pub struct Host {
    config: LeasegridConfig,
    queues: Arc<dyn QueueStore>,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    balancer: Balancer,
}

impl Host {
    /// Build a host over existing substrates.
    pub fn new(config: LeasegridConfig, queues: Arc<dyn QueueStore>, blobs: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        let retry = config
            .transient_retry_policy()
            .context("invalid [retry] section")?;
        let balancer_config =
            BalancerConfig::from_section(config.balancer.as_ref()).context("invalid [balancer] section")?;
        let states = RunnerStateStore::new(blobs.clone()).with_retry(retry);
        let balancer = Balancer::new(balancer_config).with_state_store(states);
        Ok(Self {
            config,
            queues,
            blobs,
            retry,
            balancer,
        })
    }

    /// Build a host whose blobs live in redb under `[storage].data_dir`, or
    /// in memory when no data directory is configured.
    pub fn open(config: LeasegridConfig, queues: Arc<dyn QueueStore>) -> anyhow::Result<Self> {
        let data_dir = config.storage.as_ref().and_then(|s| s.data_dir.clone());
        let blobs = match data_dir {
            Some(dir) => {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("cannot create data directory {}", dir.display()))?;
                open_blobs(&dir.join(BLOB_FILE))?
            }
            None => {
                warn!("no [storage].data_dir configured, blobs are kept in memory");
                RedbBlobStore::open_in_memory().context("cannot open in-memory blob store")?
            }
        };
        Self::new(config, queues, Arc::new(blobs))
    }

    /// Request a restart whenever `CONFIG_CONTAINER/{name}` changes.
    pub fn with_config_watch(self, name: &str) -> Self {
        let watch = BlobVersionWatch::new(self.blobs.clone(), CONFIG_CONTAINER, name);
        self.with_restart_detector(Arc::new(watch))
    }

    pub fn with_restart_detector(mut self, detector: Arc<dyn RestartDetector>) -> Self {
        self.balancer = self.balancer.with_restart_detector(detector);
        self
    }

    pub fn config(&self) -> &LeasegridConfig {
        &self.config
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    /// A handle on `name` sharing the host's substrates and retry policy.
    pub fn queue(&self, name: &str) -> LeaseQueue {
        LeaseQueue::new(name, self.queues.clone(), self.blobs.clone()).with_retry(self.retry)
    }

    /// `settings` with the matching `[runners.<queue>]` override applied.
    pub fn settings(&self, settings: RunnerSettings) -> anyhow::Result<RunnerSettings> {
        match self.config.runner_override(&settings.queue) {
            Some(over) => {
                let queue = settings.queue.clone();
                settings
                    .apply(over)
                    .with_context(|| format!("invalid [runners.{queue}] section"))
            }
            None => Ok(settings),
        }
    }

    /// Bind `handler` to the queue named in `settings` and register it.
    pub async fn register_service<T, H>(&self, settings: RunnerSettings, handler: H) -> anyhow::Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        let settings = self.settings(settings)?;
        let queue = self.queue(&settings.queue);
        let runner = ServiceRunner::<T, H>::new(settings, queue, handler)?;
        self.register(Arc::new(runner)).await
    }

    pub async fn register(&self, runner: Arc<dyn Runner>) -> anyhow::Result<()> {
        let name = runner.name().to_string();
        self.balancer
            .register(runner)
            .await
            .with_context(|| format!("cannot register runner {name}"))
    }

    /// Run the balancer until ctrl-c or a restart request.
    pub async fn run(&self) -> HostExit {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => {
                    // Keep the sender alive; a dropped sender reads as shutdown.
                    error!(error = %e, "cannot listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        });
        self.run_until(shutdown_rx).await
    }

    /// Run the balancer until `shutdown` flips or a restart is requested.
    pub async fn run_until(&self, shutdown: watch::Receiver<bool>) -> HostExit {
        let runners = self.balancer.runner_names().await;
        info!(runners = runners.len(), "host running");
        match self.balancer.execute(shutdown).await {
            Ok(()) => {
                info!("host shut down");
                HostExit::Shutdown
            }
            Err(restart) => {
                warn!(reason = %restart.reason, "host restarting");
                HostExit::Restart(restart)
            }
        }
    }
}

fn open_blobs(path: &Path) -> anyhow::Result<RedbBlobStore> {
    let store =
        RedbBlobStore::open(path).with_context(|| format!("cannot open blob store {}", path.display()))?;
    info!(path = %path.display(), "blob store opened");
    Ok(store)
}
