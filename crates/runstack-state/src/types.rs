//! Ledger record types.
//!
//! These are the persisted view of a committed stack graph. Secret payloads
//! never reach the ledger; only their fingerprints do.

use serde::{Deserialize, Serialize};

use runstack_core::{Output, Resource, ResourceKind, SecretPhase, Value};

/// The last committed declaration of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    pub stack: String,
    pub name: String,
    pub kind: ResourceKind,
    /// Provider type token, e.g. `gcp:secretmanager/secret:Secret`.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Inputs as JSON, secrets fingerprinted.
    pub properties: serde_json::Value,
    pub depends_on: Vec<String>,
    /// Unix timestamp (seconds) of the commit that wrote this snapshot.
    pub committed_at: u64,
}

impl ResourceSnapshot {
    pub fn from_resource(stack: &str, resource: &Resource, committed_at: u64) -> Self {
        Self {
            stack: stack.to_string(),
            name: resource.name.clone(),
            kind: resource.kind,
            type_token: resource.kind.type_token().to_string(),
            properties: resource.properties_json(),
            depends_on: resource.depends_on.clone(),
            committed_at,
        }
    }

    /// Build the composite key for the resources table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.stack, self.name)
    }
}

/// A committed stack output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputRecord {
    pub stack: String,
    pub name: String,
    /// Literal value, or `${resource.attribute}` until the engine resolves it.
    pub value: serde_json::Value,
    pub predicted: Option<String>,
    pub committed_at: u64,
}

impl OutputRecord {
    pub fn from_output(stack: &str, output: &Output, committed_at: u64) -> Self {
        Self {
            stack: stack.to_string(),
            name: output.name.clone(),
            value: output.value.to_json(),
            predicted: output.predicted.clone(),
            committed_at,
        }
    }

    pub fn table_key(&self) -> String {
        format!("{}/{}", self.stack, self.name)
    }

    /// Best known value: the prediction when the real one is still a reference.
    pub fn display_value(&self) -> String {
        match (&self.value, &self.predicted) {
            (serde_json::Value::String(s), Some(predicted)) if s.starts_with("${") => {
                predicted.clone()
            }
            (serde_json::Value::String(s), _) => s.clone(),
            (other, _) => other.to_string(),
        }
    }
}

/// One entry in a secret's append-only version history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretVersionRecord {
    pub stack: String,
    /// Name of the secret version resource that wrote it.
    pub resource: String,
    /// 1-based, increasing per resource.
    pub version: u32,
    /// `sha256:` fingerprint of the payload.
    pub fingerprint: String,
    pub created_at: u64,
}

impl SecretVersionRecord {
    pub fn table_key(&self) -> String {
        version_key(&self.stack, &self.resource, self.version)
    }
}

pub(crate) fn version_prefix(stack: &str, resource: &str) -> String {
    format!("{stack}/{resource}:")
}

pub(crate) fn version_key(stack: &str, resource: &str, version: u32) -> String {
    format!("{}{version:010}", version_prefix(stack, resource))
}

/// Fingerprint of a secret version resource's payload, if it has one.
pub fn secret_fingerprint(resource: &Resource) -> Option<String> {
    match resource.properties.get("secretData") {
        Some(Value::Secret(secret)) => Some(secret.fingerprint()),
        _ => None,
    }
}

/// Per-stack commit metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackRecord {
    pub name: String,
    /// Incremented on every commit.
    pub serial: u64,
    pub committed_at: u64,
    pub resources: usize,
    /// Phase the stack's secret reached in the last commit.
    pub secret_phase: SecretPhase,
}
