//! redb table definitions for the runstack ledger.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Keys are prefixed with the stack name: `{stack}/{resource}`.

use redb::TableDefinition;

/// Shape shared by every ledger table.
pub type LedgerTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Committed resource snapshots keyed by `{stack}/{resource}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Stack outputs keyed by `{stack}/{output}`.
pub const OUTPUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("outputs");

/// Secret version history keyed by `{stack}/{secret}:{version:010}`.
pub const SECRET_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("secret_versions");

/// Per-stack commit metadata keyed by `{stack}`.
pub const STACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("stacks");
