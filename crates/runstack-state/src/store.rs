//! StateStore: redb-backed ledger of committed stack graphs.
//!
//! Records the last committed snapshot of every resource, the stack's
//! outputs, and the append-only history of secret versions. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use runstack_core::{ResourceKind, SecretLifecycle, SecretPhase, StackGraph};

use crate::error::{StateError, StateResult};
use crate::plan::{Action, Plan};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub stack: String,
    pub serial: u64,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub retained: usize,
    /// Version numbers appended to the secret history.
    pub new_secret_versions: Vec<u32>,
    pub secret_phase: SecretPhase,
}

/// Thread-safe ledger backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
        txn.open_table(SECRET_VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(STACKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// All committed resource snapshots of a stack.
    pub fn list_resources(&self, stack: &str) -> StateResult<Vec<ResourceSnapshot>> {
        self.scan(RESOURCES, &format!("{stack}/"))
    }

    pub fn get_resource(&self, stack: &str, name: &str) -> StateResult<Option<ResourceSnapshot>> {
        self.get(RESOURCES, &format!("{stack}/{name}"))
    }

    pub fn list_outputs(&self, stack: &str) -> StateResult<Vec<OutputRecord>> {
        self.scan(OUTPUTS, &format!("{stack}/"))
    }

    /// Version history of one secret version resource, oldest first.
    pub fn secret_versions(
        &self,
        stack: &str,
        resource: &str,
    ) -> StateResult<Vec<SecretVersionRecord>> {
        self.scan(SECRET_VERSIONS, &version_prefix(stack, resource))
    }

    /// Every secret version recorded for a stack, oldest first per resource.
    pub fn all_secret_versions(&self, stack: &str) -> StateResult<Vec<SecretVersionRecord>> {
        self.scan(SECRET_VERSIONS, &format!("{stack}/"))
    }

    pub fn stack_record(&self, stack: &str) -> StateResult<Option<StackRecord>> {
        self.get(STACKS, stack)
    }

    pub fn list_stacks(&self) -> StateResult<Vec<StackRecord>> {
        self.scan(STACKS, "")
    }

    /// Diff a graph against this ledger.
    pub fn plan(&self, graph: &StackGraph) -> StateResult<Plan> {
        let recorded = self.list_resources(graph.stack())?;
        Ok(Plan::compute(graph, &recorded))
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: LedgerTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(
        &self,
        table: LedgerTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Record `graph` as the stack's committed state, following `plan`.
    ///
    /// Runs in one write transaction: either every change lands or none
    /// does. Secret versions written by the plan are appended to the
    /// history; earlier versions are never removed.
    pub fn commit(&self, graph: &StackGraph, plan: &Plan) -> StateResult<CommitReport> {
        if plan.stack != graph.stack() {
            return Err(StateError::StackMismatch {
                plan: plan.stack.clone(),
                graph: graph.stack().to_string(),
            });
        }
        let stack = graph.stack();
        let now = unix_now();
        let secret_name = graph
            .resources_of_kind(ResourceKind::SecretContainer)
            .next()
            .and_then(|r| r.get("secretId").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_else(|| stack.to_string());
        let mut lifecycle = SecretLifecycle::new(&secret_name);

        let mut report = CommitReport {
            stack: stack.to_string(),
            serial: 0,
            created: plan.count(Action::Create),
            updated: plan.count(Action::Update),
            replaced: plan.count(Action::Replace),
            deleted: plan.count(Action::Delete),
            retained: plan.count(Action::Retain),
            new_secret_versions: Vec::new(),
            secret_phase: SecretPhase::Absent,
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut resources = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let mut versions = txn.open_table(SECRET_VERSIONS).map_err(map_err!(Table))?;

            for change in &plan.changes {
                let key = format!("{stack}/{}", change.resource);
                if !change.action.keeps_declaration() {
                    resources.remove(key.as_str()).map_err(map_err!(Write))?;
                    debug!(%key, action = change.action.label(), "resource dropped from ledger");
                    continue;
                }

                let resource = graph.get(&change.resource).ok_or_else(|| {
                    StateError::Write(format!("plan names unknown resource {}", change.resource))
                })?;
                if let Some(phase) = SecretPhase::reached_by(resource.kind) {
                    lifecycle.advance(phase)?;
                }
                if change.action == Action::Same {
                    continue;
                }

                let snapshot = ResourceSnapshot::from_resource(stack, resource, now);
                put_json(&mut resources, &key, &snapshot)?;

                if resource.kind == ResourceKind::SecretVersion
                    && let Some(fingerprint) = secret_fingerprint(resource)
                {
                    let version = next_version(&versions, stack, &resource.name)?;
                    let record = SecretVersionRecord {
                        stack: stack.to_string(),
                        resource: resource.name.clone(),
                        version,
                        fingerprint,
                        created_at: now,
                    };
                    put_json(&mut versions, &record.table_key(), &record)?;
                    report.new_secret_versions.push(version);
                }
            }
        }
        {
            let mut outputs = txn.open_table(OUTPUTS).map_err(map_err!(Table))?;
            let prefix = format!("{stack}/");
            let mut stale = Vec::new();
            for entry in outputs.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    stale.push(key.value().to_string());
                }
            }
            for key in stale {
                outputs.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for output in graph.outputs() {
                let record = OutputRecord::from_output(stack, output, now);
                put_json(&mut outputs, &record.table_key(), &record)?;
            }
        }
        {
            let mut stacks = txn.open_table(STACKS).map_err(map_err!(Table))?;
            let previous: Option<StackRecord> = match stacks.get(stack).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let record = StackRecord {
                name: stack.to_string(),
                serial: previous.map_or(1, |p| p.serial + 1),
                committed_at: now,
                resources: graph.len(),
                secret_phase: lifecycle.phase(),
            };
            put_json(&mut stacks, stack, &record)?;
            report.serial = record.serial;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        report.secret_phase = lifecycle.phase();
        info!(
            stack,
            serial = report.serial,
            created = report.created,
            updated = report.updated,
            replaced = report.replaced,
            secret_versions = report.new_secret_versions.len(),
            phase = %report.secret_phase,
            "stack committed"
        );
        Ok(report)
    }
}

fn put_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Next version number for a secret version resource.
fn next_version(
    table: &Table<'_, &'static str, &'static [u8]>,
    stack: &str,
    resource: &str,
) -> StateResult<u32> {
    let prefix = version_prefix(stack, resource);
    let mut latest = 0;
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if let Some(n) = key.value().strip_prefix(&prefix) {
            let n: u32 = n.parse::<u32>().map_err(map_err!(Deserialize))?;
            latest = latest.max(n);
        }
    }
    Ok(latest + 1)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
