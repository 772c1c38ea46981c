//! redb table definitions for the Kedge state store.
//!
//! Each table uses `&str` keys (`{namespace}/{name}`) and `&[u8]` values
//! holding JSON-serialized records.

use redb::TableDefinition;

/// Scaling target specs keyed by `{namespace}/{name}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Published target statuses keyed by `{namespace}/{name}`.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");
