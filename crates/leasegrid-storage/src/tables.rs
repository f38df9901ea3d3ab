//! redb table definitions for the persistent blob store.
//!
//! Keys are `{container}/{name}`; values pair the numeric version with the
//! raw blob bytes.

use redb::TableDefinition;

/// Blobs keyed by `{container}/{name}`.
pub const BLOBS: TableDefinition<&str, (u64, &[u8])> = TableDefinition::new("blobs");

/// Single-row table holding the last issued version.
pub const VERSION_SEQ: TableDefinition<&str, u64> = TableDefinition::new("version_seq");

/// Row key inside [`VERSION_SEQ`].
pub const VERSION_SEQ_KEY: &str = "last";
