//! Restart signalling.
//!
//! A [`RestartRequested`] is the only failure that escapes the balancer: the
//! host tears the process down and starts it again, picking up new
//! configuration or code. It can come from a handler, from a scheduled task,
//! or from a [`RestartDetector`] polled once per balancer pass.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use leasegrid_storage::{BlobStore, Version};
use thiserror::Error;
use tracing::{debug, info};

/// Request to restart the hosting process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("restart requested: {reason}")]
pub struct RestartRequested {
    pub reason: String,
}

impl RestartRequested {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Polled by the balancer between passes.
#[async_trait]
pub trait RestartDetector: Send + Sync + 'static {
    async fn check(&self) -> Option<RestartRequested>;
}

/// Flags a restart once a watched blob's version moves away from the
/// version seen on the first check.
///
/// Creating or deleting the blob counts as a change. Read failures are
/// ignored until the next check.
pub struct BlobVersionWatch {
    blobs: Arc<dyn BlobStore>,
    container: String,
    name: String,
    /// `None` until the first successful read.
    baseline: Mutex<Option<Option<Version>>>,
}

impl BlobVersionWatch {
    pub fn new(blobs: Arc<dyn BlobStore>, container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            blobs,
            container: container.into(),
            name: name.into(),
            baseline: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RestartDetector for BlobVersionWatch {
    async fn check(&self) -> Option<RestartRequested> {
        let current = match self.blobs.get(&self.container, &self.name).await {
            Ok(blob) => blob.map(|b| b.version),
            Err(e) => {
                debug!(container = %self.container, name = %self.name, error = %e, "watched blob unreadable");
                return None;
            }
        };

        let mut baseline = self.baseline.lock().ok()?;
        match *baseline {
            None => {
                *baseline = Some(current);
                None
            }
            Some(ref seen) if *seen == current => None,
            Some(_) => {
                info!(container = %self.container, name = %self.name, "watched blob changed");
                Some(RestartRequested::new(format!(
                    "{}/{} changed",
                    self.container, self.name
                )))
            }
        }
    }
}

/// Restart trigger flipped from inside the process, e.g. by an admin handler.
#[derive(Debug, Clone, Default)]
pub struct RestartSwitch {
    pending: Arc<Mutex<Option<RestartRequested>>>,
}

impl RestartSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, reason: impl Into<String>) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(RestartRequested::new(reason));
        }
    }
}

#[async_trait]
impl RestartDetector for RestartSwitch {
    async fn check(&self) -> Option<RestartRequested> {
        self.pending.lock().ok()?.take()
    }
}
