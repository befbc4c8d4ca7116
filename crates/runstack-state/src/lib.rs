//! runstack-state: desired-state ledger for runstack stacks.
//!
//! Backed by [redb](https://docs.rs/redb). The ledger remembers what was
//! last committed for each stack so a new graph can be planned against it:
//! which resources would be created, updated, replaced, or dropped, and how
//! many secret versions a change writes.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Keys are prefixed with the stack name (`{stack}/{resource}`), so one
//! ledger file can hold several stacks.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod plan;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use plan::{Action, Change, Plan, format_plan};
pub use store::{CommitReport, StateStore};
pub use types::*;
