//! Plan: diff a desired graph against the last committed snapshots.
//!
//! Changes to top-level properties listed in
//! [`ResourceKind::replace_on_change`] force a replacement; any other
//! property change is an in-place update. Dependency edges alone never
//! produce a change. Removed resources whose kind retains on delete
//! (enablements, secret versions) are dropped from the ledger but left live.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use runstack_core::{ResourceKind, StackGraph};

use crate::types::ResourceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    /// Forget the resource without destroying it.
    Retain,
    Same,
}

impl Action {
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "+-",
            Action::Delete => "-",
            Action::Retain => "<",
            Action::Same => " ",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::Retain => "retain",
            Action::Same => "same",
        }
    }

    /// Whether the resource is present after the change.
    pub fn keeps_declaration(&self) -> bool {
        !matches!(self, Action::Delete | Action::Retain)
    }
}

/// One planned change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub resource: String,
    pub kind: ResourceKind,
    pub action: Action,
    /// Top-level properties that differ from the ledger.
    pub changed: Vec<String>,
}

/// Ordered changes for one stack: declared resources in apply order, then
/// removals with dependents first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,
    pub changes: Vec<Change>,
}

impl Plan {
    pub fn compute(graph: &StackGraph, recorded: &[ResourceSnapshot]) -> Self {
        let previous: HashMap<&str, &ResourceSnapshot> =
            recorded.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut changes = Vec::with_capacity(graph.len());

        for resource in graph.apply_order() {
            let desired = resource.properties_json();
            let change = match previous.get(resource.name.as_str()) {
                None => Change {
                    resource: resource.name.clone(),
                    kind: resource.kind,
                    action: Action::Create,
                    changed: Vec::new(),
                },
                Some(snapshot) if snapshot.kind != resource.kind => Change {
                    resource: resource.name.clone(),
                    kind: resource.kind,
                    action: Action::Replace,
                    changed: vec!["kind".to_string()],
                },
                Some(snapshot) => {
                    let changed = changed_keys(&snapshot.properties, &desired);
                    let replace = changed.iter().any(|k| {
                        resource
                            .kind
                            .replace_on_change()
                            .iter()
                            .any(|p| *p == k.as_str())
                    });
                    let action = match (changed.is_empty(), replace) {
                        (true, _) => Action::Same,
                        (false, true) => Action::Replace,
                        (false, false) => Action::Update,
                    };
                    Change {
                        resource: resource.name.clone(),
                        kind: resource.kind,
                        action,
                        changed,
                    }
                }
            };
            changes.push(change);
        }

        let removed: Vec<&ResourceSnapshot> = recorded
            .iter()
            .filter(|s| graph.get(&s.name).is_none())
            .collect();
        for snapshot in removal_order(removed) {
            changes.push(Change {
                resource: snapshot.name.clone(),
                kind: snapshot.kind,
                action: if snapshot.kind.retain_on_delete() {
                    Action::Retain
                } else {
                    Action::Delete
                },
                changed: Vec::new(),
            });
        }

        Plan {
            stack: graph.stack().to_string(),
            changes,
        }
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != Action::Same)
    }

    pub fn count(&self, action: Action) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub fn change(&self, resource: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.resource == resource)
    }

    /// Number of secret versions this plan writes.
    pub fn new_secret_versions(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| {
                c.kind == ResourceKind::SecretVersion
                    && matches!(c.action, Action::Create | Action::Replace)
            })
            .count()
    }
}

/// Top-level keys whose values differ between two property objects.
fn changed_keys(before: &serde_json::Value, after: &serde_json::Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}

/// Order removed snapshots so a resource goes before anything it depends on.
fn removal_order(mut pending: Vec<&ResourceSnapshot>) -> Vec<&ResourceSnapshot> {
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let idx = pending
            .iter()
            .position(|candidate| {
                !pending
                    .iter()
                    .any(|other| other.depends_on.iter().any(|d| *d == candidate.name))
            })
            // Ledger edges came from acyclic graphs; fall back to stored order.
            .unwrap_or(0);
        ordered.push(pending.remove(idx));
    }
    ordered
}

/// Human-readable plan listing.
pub fn format_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stack {}:\n", plan.stack);
    for change in &plan.changes {
        let _ = write!(
            out,
            "  {:<2} {:<32} {:<14} {}",
            change.action.symbol(),
            change.resource,
            change.kind.label(),
            change.action.label()
        );
        if !change.changed.is_empty() {
            let _ = write!(out, " ({})", change.changed.join(", "));
        }
        out.push('\n');
    }

    out.push('\n');
    if !plan.has_changes() {
        out.push_str("No changes.\n");
        return out;
    }
    let _ = writeln!(
        out,
        "{} to create, {} to update, {} to replace, {} to delete, {} to retain, {} unchanged.",
        plan.count(Action::Create),
        plan.count(Action::Update),
        plan.count(Action::Replace),
        plan.count(Action::Delete),
        plan.count(Action::Retain),
        plan.count(Action::Same),
    );
    let versions = plan.new_secret_versions();
    if versions > 0 {
        let _ = writeln!(out, "{versions} new secret version(s); earlier versions are kept.");
    }
    out
}
