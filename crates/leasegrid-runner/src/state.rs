//! Persisted runner enable/disable state.
//!
//! One JSON blob shared by every process instance:
//!
//! ```text
//! leasegrid-services/states
//!   {"runners":{"emails":"started","invoices":"stopped"}}
//! ```
//!
//! Updates are read-modify-write cycles guarded by the blob version, so
//! operators and instances registering new runners never overwrite each
//! other.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use leasegrid_core::RetryPolicy;
use leasegrid_storage::{BlobStore, StorageError, WritePrecondition, WriteResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RunnerError, RunnerResult};

pub const SERVICES_CONTAINER: &str = "leasegrid-services";
pub const STATES_BLOB: &str = "states";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Started,
    Stopped,
}

impl RunnerState {
    pub fn from_auto_start(auto_start: bool) -> Self {
        if auto_start {
            RunnerState::Started
        } else {
            RunnerState::Stopped
        }
    }

    pub fn is_started(self) -> bool {
        self == RunnerState::Started
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatesDocument {
    #[serde(default)]
    runners: BTreeMap<String, RunnerState>,
}

#[derive(Clone)]
pub struct RunnerStateStore {
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    conflicts: RetryPolicy,
}

impl RunnerStateStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            retry: RetryPolicy::transient_server_errors(),
            conflicts: RetryPolicy::optimistic_concurrency(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current states; empty if nothing was ever persisted.
    pub async fn load(&self) -> RunnerResult<BTreeMap<String, RunnerState>> {
        Ok(self.read().await?.0.runners)
    }

    /// Set the state of one runner.
    pub async fn set(&self, name: &str, state: RunnerState) -> RunnerResult<()> {
        self.update(|doc| doc.runners.insert(name.to_string(), state) != Some(state))
            .await?;
        info!(runner = %name, ?state, "runner state set");
        Ok(())
    }

    /// Add runners not yet known with their auto-start state and return the
    /// full table. Existing entries are never touched.
    pub async fn ensure(&self, defaults: &[(String, bool)]) -> RunnerResult<BTreeMap<String, RunnerState>> {
        self.update(|doc| {
            let mut changed = false;
            for (name, auto_start) in defaults {
                if !doc.runners.contains_key(name) {
                    doc.runners
                        .insert(name.clone(), RunnerState::from_auto_start(*auto_start));
                    changed = true;
                }
            }
            changed
        })
        .await
    }

    /// Apply `change` until it commits. `change` returns false when there is
    /// nothing to write.
    async fn update<F>(&self, change: F) -> RunnerResult<BTreeMap<String, RunnerState>>
    where
        F: Fn(&mut StatesDocument) -> bool,
    {
        let change = &change;
        self.conflicts
            .run("states.update", RunnerError::is_conflict, || async move {
                let (mut doc, precondition) = self.read().await?;
                if !change(&mut doc) {
                    return Ok(doc.runners);
                }
                let data = Bytes::from(serde_json::to_vec(&doc).map_err(|e| self.corrupt(e))?);
                let written = self
                    .retry
                    .run("states.put", StorageError::is_transient, || {
                        self.blobs
                            .put(SERVICES_CONTAINER, STATES_BLOB, data.clone(), precondition.clone())
                    })
                    .await?;
                match written {
                    WriteResult::Written { .. } => Ok(doc.runners),
                    WriteResult::PreconditionFailed { .. } => {
                        Err(RunnerError::Conflict(format!("{SERVICES_CONTAINER}/{STATES_BLOB}")))
                    }
                }
            })
            .await
    }

    async fn read(&self) -> RunnerResult<(StatesDocument, WritePrecondition)> {
        let blob = self
            .retry
            .run("states.get", StorageError::is_transient, || {
                self.blobs.get(SERVICES_CONTAINER, STATES_BLOB)
            })
            .await?;
        match blob {
            None => Ok((StatesDocument::default(), WritePrecondition::DoesNotExist)),
            Some(blob) => {
                let doc = serde_json::from_slice(&blob.data).map_err(|e| self.corrupt(e))?;
                Ok((doc, WritePrecondition::MatchesVersion(blob.version)))
            }
        }
    }

    fn corrupt(&self, e: serde_json::Error) -> RunnerError {
        RunnerError::CorruptState {
            name: format!("{SERVICES_CONTAINER}/{STATES_BLOB}"),
            reason: e.to_string(),
        }
    }
}
