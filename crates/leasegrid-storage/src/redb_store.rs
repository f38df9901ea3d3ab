//! RedbBlobStore: persistent blob substrate backed by redb.
//!
//! redb serializes write transactions, so reading the current version,
//! checking the precondition, and writing the new value inside one write
//! transaction gives the same linearizable conditional write a cloud blob
//! service offers. Versions come from a monotonically increasing sequence
//! so a token from a deleted blob never matches its successor.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::blob::{Blob, BlobStore, Version, WritePrecondition, WriteResult};
use crate::error::{StorageError, StorageResult};
use crate::tables::*;

/// Convert any `Display` error into a `StorageError::Backend` tagged with the
/// failing step.
macro_rules! map_err {
    ($step:literal) => {
        |e| StorageError::Backend(format!("{}: {e}", $step))
    };
}

fn blob_key(container: &str, name: &str) -> String {
    format!("{container}/{name}")
}

/// Thread-safe blob store backed by redb.
#[derive(Clone)]
pub struct RedbBlobStore {
    db: Arc<Database>,
}

impl RedbBlobStore {
    /// Open (or create) a persistent blob store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let db = Database::create(path).map_err(map_err!("open"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "blob store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory blob store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!("open"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory blob store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        txn.open_table(BLOBS).map_err(map_err!("table"))?;
        txn.open_table(VERSION_SEQ).map_err(map_err!("table"))?;
        txn.commit().map_err(map_err!("commit"))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for RedbBlobStore {
    async fn get(&self, container: &str, name: &str) -> StorageResult<Option<Blob>> {
        let key = blob_key(container, name);
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(BLOBS).map_err(map_err!("table"))?;
        let found = table.get(key.as_str()).map_err(map_err!("read"))?;
        Ok(found.map(|guard| {
            let (version, data) = guard.value();
            Blob {
                data: Bytes::copy_from_slice(data),
                version: Version(version.to_string()),
            }
        }))
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult> {
        let key = blob_key(container, name);
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let outcome = {
            let mut table = txn.open_table(BLOBS).map_err(map_err!("table"))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!("read"))?
                .map(|guard| Version(guard.value().0.to_string()));

            let allowed = match precondition {
                WritePrecondition::DoesNotExist => current.is_none(),
                WritePrecondition::MatchesVersion(ref expected) => {
                    current.as_ref() == Some(expected)
                }
                WritePrecondition::None => true,
            };
            if allowed {
                let mut seq = txn.open_table(VERSION_SEQ).map_err(map_err!("table"))?;
                let last = seq
                    .get(VERSION_SEQ_KEY)
                    .map_err(map_err!("read"))?
                    .map(|guard| guard.value())
                    .unwrap_or(0);
                let version = last + 1;
                seq.insert(VERSION_SEQ_KEY, version)
                    .map_err(map_err!("write"))?;
                table
                    .insert(key.as_str(), (version, data.as_ref()))
                    .map_err(map_err!("write"))?;
                Ok(version)
            } else {
                Err(current)
            }
        };

        let version = match outcome {
            Ok(version) => version,
            Err(current) => {
                txn.abort().map_err(map_err!("abort"))?;
                return Ok(WriteResult::PreconditionFailed { current });
            }
        };
        txn.commit().map_err(map_err!("commit"))?;
        debug!(%key, version, "blob written");
        Ok(WriteResult::Written {
            version: Version(version.to_string()),
        })
    }

    async fn delete(&self, container: &str, name: &str) -> StorageResult<bool> {
        let key = blob_key(container, name);
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let existed;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!("table"))?;
            existed = table.remove(key.as_str()).map_err(map_err!("write"))?.is_some();
        }
        txn.commit().map_err(map_err!("commit"))?;
        debug!(%key, existed, "blob deleted");
        Ok(existed)
    }

    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = blob_key(container, prefix);
        let container_prefix_len = container.len() + 1;
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(BLOBS).map_err(map_err!("table"))?;
        let mut names = Vec::new();
        for entry in table.range(full_prefix.as_str()..).map_err(map_err!("read"))? {
            let (key, _) = entry.map_err(map_err!("read"))?;
            let key = key.value();
            if !key.starts_with(&full_prefix) {
                break;
            }
            names.push(key[container_prefix_len..].to_string());
        }
        Ok(names)
    }
}
