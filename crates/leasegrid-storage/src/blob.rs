//! Blob substrate contract.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Opaque concurrency stamp of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A blob's content together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: Bytes,
    pub version: Version,
}

/// Condition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the blob does not exist.
    DoesNotExist,
    /// Write only if the blob's version matches.
    MatchesVersion(Version),
    /// Write unconditionally.
    None,
}

/// Outcome of a conditional write.
///
/// A failed precondition is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written { version: Version },
    PreconditionFailed { current: Option<Version> },
}

impl WriteResult {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Named blobs grouped in containers, with optimistic concurrency.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Read a blob. `None` if it does not exist.
    async fn get(&self, container: &str, name: &str) -> StorageResult<Option<Blob>>;

    /// Write a blob subject to `precondition`.
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> StorageResult<WriteResult>;

    /// Delete a blob. Returns false if it did not exist.
    async fn delete(&self, container: &str, name: &str) -> StorageResult<bool>;

    /// Names in `container` starting with `prefix`, sorted.
    async fn list(&self, container: &str, prefix: &str) -> StorageResult<Vec<String>>;
}
