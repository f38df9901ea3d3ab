//! Interval-triggered runners, coordinated across process instances.
//!
//! Each scheduled runner owns a blob `leasegrid-schedules/{name}` holding
//! the time of the last execution. An instance executes only after winning
//! a conditional write that advances that time, so at most one instance
//! runs the task per interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use leasegrid_core::{Clock, RetryPolicy, SystemClock};
use leasegrid_storage::{BlobStore, StorageError, WritePrecondition, WriteResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::handler::{HandlerError, HandlerResult};
use crate::service::Runner;

pub const SCHEDULES_CONTAINER: &str = "leasegrid-schedules";

/// Work executed by a [`ScheduledRunner`].
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    async fn run(&self) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> ScheduledTask for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self) -> HandlerResult {
        (self)().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ScheduleState {
    last_run_ms: u64,
}

pub struct ScheduledRunner<S> {
    name: String,
    interval: Duration,
    task: S,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    auto_start: bool,
}

impl<S: ScheduledTask> ScheduledRunner<S> {
    pub fn new(name: impl Into<String>, interval: Duration, blobs: Arc<dyn BlobStore>, task: S) -> Self {
        Self {
            name: name.into(),
            interval,
            task,
            blobs,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::transient_server_errors(),
            auto_start: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Try to claim the current interval. Returns false if the interval is
    /// not due yet or another instance claimed it first.
    async fn claim(&self) -> RunnerResult<bool> {
        let now = self.clock.now_ms();
        let blob = self
            .retry
            .run("schedule.get", StorageError::is_transient, || {
                self.blobs.get(SCHEDULES_CONTAINER, &self.name)
            })
            .await?;

        let precondition = match blob {
            None => WritePrecondition::DoesNotExist,
            Some(blob) => {
                let state: ScheduleState =
                    serde_json::from_slice(&blob.data).map_err(|e| RunnerError::CorruptState {
                        name: format!("{SCHEDULES_CONTAINER}/{}", self.name),
                        reason: e.to_string(),
                    })?;
                let due = state
                    .last_run_ms
                    .saturating_add(self.interval.as_millis() as u64);
                if now < due {
                    return Ok(false);
                }
                WritePrecondition::MatchesVersion(blob.version)
            }
        };

        let data = Bytes::from(serde_json::to_vec(&ScheduleState { last_run_ms: now }).map_err(
            |e| RunnerError::CorruptState {
                name: format!("{SCHEDULES_CONTAINER}/{}", self.name),
                reason: e.to_string(),
            },
        )?);
        let written = self
            .retry
            .run("schedule.put", StorageError::is_transient, || {
                self.blobs
                    .put(SCHEDULES_CONTAINER, &self.name, data.clone(), precondition.clone())
            })
            .await?;
        if let WriteResult::PreconditionFailed { .. } = written {
            debug!(schedule = %self.name, "interval claimed by another instance");
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl<S: ScheduledTask> Runner for ScheduledRunner<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn auto_start(&self) -> bool {
        self.auto_start
    }

    async fn run_once(&self) -> RunnerResult<bool> {
        if !self.claim().await? {
            return Ok(false);
        }

        info!(schedule = %self.name, "scheduled task starting");
        match self.task.run().await {
            Ok(()) => {}
            Err(HandlerError::Restart(restart)) => return Err(restart.into()),
            Err(e) => warn!(schedule = %self.name, error = %e, "scheduled task failed"),
        }
        Ok(true)
    }
}
