//! Queue-bound dispatch loop.
//!
//! ```text
//! run_once
//!   └── pull(batch_size, visibility_timeout, max_trials)
//!         ├── empty ───────────────────────── false
//!         └── per message
//!               ├── decode fails ──────────── record failure, abandon
//!               └── handle
//!                     ├── Ok ──────────────── delete
//!                     ├── Failed ──────────── record failure, lease expires
//!                     ├── Abandon ─────────── record failure, abandon
//!                     └── Restart ─────────── propagate
//! ```

use std::marker::PhantomData;

use async_trait::async_trait;
use leasegrid_core::{ConfigError, RunnerSettings};
use leasegrid_queue::{LeaseQueue, LeasedMessage};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::handler::{Delivery, HandlerError, MessageHandler};

/// Unit of work the balancer drives.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Whether the runner starts enabled when no persisted state exists.
    fn auto_start(&self) -> bool;

    /// One-time setup on registration, such as creating the queue.
    async fn initialize(&self) -> RunnerResult<()> {
        Ok(())
    }

    /// Do one unit of work. Returns false only when there was nothing to do.
    async fn run_once(&self) -> RunnerResult<bool>;
}

/// Dispatches messages of type `T` from one queue to a handler.
pub struct ServiceRunner<T, H> {
    settings: RunnerSettings,
    queue: LeaseQueue,
    handler: H,
    _payload: PhantomData<fn() -> T>,
}

impl<T, H> ServiceRunner<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    /// Bind `handler` to `queue` with validated `settings`.
    pub fn new(settings: RunnerSettings, queue: LeaseQueue, handler: H) -> RunnerResult<Self> {
        settings.validate()?;
        if queue.name() != settings.queue {
            return Err(ConfigError::Invalid(format!(
                "runner for {} bound to queue {}",
                settings.queue,
                queue.name()
            ))
            .into());
        }
        Ok(Self {
            settings,
            queue,
            handler,
            _payload: PhantomData,
        })
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &LeaseQueue {
        &self.queue
    }

    async fn dispatch(&self, message: LeasedMessage) -> RunnerResult<()> {
        let queue = self.queue.name();
        let payload: T = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%queue, message_id = %message.id, error = %e, "undecodable message");
                self.give_back(&message, &format!("undecodable payload: {e}"))
                    .await;
                return Ok(());
            }
        };

        let delivery = Delivery {
            queue: queue.to_string(),
            message_id: message.id.clone(),
            dequeue_count: message.dequeue_count,
            leased_until_ms: message.leased_until_ms,
        };

        match self.handler.handle(payload, delivery).await {
            Ok(()) => {
                if let Err(e) = self.queue.delete(&message).await {
                    error!(%queue, message_id = %message.id, error = %e, "handled message not deleted");
                } else {
                    debug!(%queue, message_id = %message.id, "message handled");
                }
            }
            Err(HandlerError::Failed(e)) => {
                let evidence = format!("{e:#}");
                warn!(
                    %queue,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %evidence,
                    "handler failed"
                );
                self.record_failure(&message, &evidence).await;
            }
            Err(HandlerError::Abandon(reason)) => {
                debug!(%queue, message_id = %message.id, %reason, "message abandoned by handler");
                self.give_back(&message, &reason).await;
            }
            Err(HandlerError::Restart(restart)) => {
                warn!(%queue, message_id = %message.id, reason = %restart.reason, "handler requested restart");
                return Err(RunnerError::Restart(restart));
            }
        }
        Ok(())
    }

    async fn record_failure(&self, message: &LeasedMessage, evidence: &str) {
        if let Err(e) = self.queue.record_failure(message, evidence).await {
            debug!(queue = %self.queue.name(), message_id = %message.id, error = %e, "failure evidence not recorded");
        }
    }

    async fn give_back(&self, message: &LeasedMessage, evidence: &str) {
        self.record_failure(message, evidence).await;
        if let Err(e) = self.queue.abandon(message).await {
            warn!(queue = %self.queue.name(), message_id = %message.id, error = %e, "abandon failed, waiting for lease expiry");
        }
    }
}

#[async_trait]
impl<T, H> Runner for ServiceRunner<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    fn name(&self) -> &str {
        &self.settings.queue
    }

    fn auto_start(&self) -> bool {
        self.settings.auto_start
    }

    async fn initialize(&self) -> RunnerResult<()> {
        self.queue.ensure_exists().await?;
        Ok(())
    }

    async fn run_once(&self) -> RunnerResult<bool> {
        let messages = self
            .queue
            .pull(
                self.settings.batch_size,
                self.settings.visibility_timeout,
                self.settings.max_trials,
            )
            .await?;
        if messages.is_empty() {
            return Ok(false);
        }

        debug!(queue = %self.queue.name(), count = messages.len(), "dispatching batch");
        for message in messages {
            self.dispatch(message).await?;
        }
        Ok(true)
    }
}
