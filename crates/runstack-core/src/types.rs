//! Resource model shared by the graph builder and the ledger.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

// ── Secrets ───────────────────────────────────────────────────────

/// A secret payload. Never printed; serialized as its fingerprint.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `sha256:<hex>` digest of the payload.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("sha256:{}", hex::encode(digest))
    }

    /// The plaintext, for handing to the engine.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({})", self.fingerprint())
    }
}

/// How secret payloads appear in a JSON view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretRendering {
    /// `{"secret": "sha256:..."}`. Used for plans, the ledger and logs.
    #[default]
    Fingerprint,
    /// `{"secret": true, "value": "...", "fingerprint": "sha256:..."}`.
    /// Only for the document handed to the engine.
    Reveal,
}

// ── Values ────────────────────────────────────────────────────────

/// An output attribute of another resource, resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    pub attribute: String,
}

impl Reference {
    pub fn new(resource: &str, attribute: &str) -> Self {
        Self {
            resource: resource.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// A resource property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(Reference),
    Secret(SecretValue),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn reference(resource: &str, attribute: &str) -> Self {
        Value::Ref(Reference::new(resource, attribute))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// JSON view with secrets replaced by fingerprints and references
    /// rendered as `${resource.attribute}`.
    pub fn to_json(&self) -> serde_json::Value {
        self.render_json(SecretRendering::Fingerprint)
    }

    pub fn render_json(&self, secrets: SecretRendering) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(|v| v.render_json(secrets)).collect(),
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.render_json(secrets)))
                    .collect(),
            ),
            Value::Ref(r) => serde_json::Value::String(r.to_string()),
            Value::Secret(s) => match secrets {
                SecretRendering::Fingerprint => serde_json::json!({ "secret": s.fingerprint() }),
                SecretRendering::Reveal => serde_json::json!({
                    "secret": true,
                    "value": s.expose(),
                    "fingerprint": s.fingerprint(),
                }),
            },
        }
    }

    /// Depth-first walk over every reference inside this value.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(entries) => entries.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Follow a `/`-separated path of map keys and list indices.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Map(entries) => entries.get(segment)?,
                Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

// ── Resources ─────────────────────────────────────────────────────

/// Kinds of resource a stack declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    CapabilityEnablement,
    ContainerImage,
    SecretContainer,
    SecretVersion,
    SecretAccessGrant,
    ManagedService,
    InvocationGrant,
}

impl ResourceKind {
    /// Provider type token understood by the orchestration engine.
    pub fn type_token(&self) -> &'static str {
        match self {
            ResourceKind::CapabilityEnablement => "gcp:projects/service:Service",
            ResourceKind::ContainerImage => "docker:index/image:Image",
            ResourceKind::SecretContainer => "gcp:secretmanager/secret:Secret",
            ResourceKind::SecretVersion => "gcp:secretmanager/secretVersion:SecretVersion",
            ResourceKind::SecretAccessGrant => {
                "gcp:secretmanager/secretIamMember:SecretIamMember"
            }
            ResourceKind::ManagedService => "gcp:cloudrunv2/service:Service",
            ResourceKind::InvocationGrant => "gcp:cloudrunv2/serviceIamMember:ServiceIamMember",
        }
    }

    /// Top-level properties whose change forces a new resource identity.
    pub fn replace_on_change(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::CapabilityEnablement => &["project", "service"],
            ResourceKind::ContainerImage => &["imageName"],
            ResourceKind::SecretContainer => &["project", "secretId", "replication"],
            ResourceKind::SecretVersion => &["secret", "secretData"],
            ResourceKind::SecretAccessGrant => &["secretId", "role", "member"],
            ResourceKind::ManagedService => &["project", "location", "name"],
            ResourceKind::InvocationGrant => &["name", "location", "role", "member"],
        }
    }

    /// Whether dropping the declaration leaves the live resource in place.
    ///
    /// Enablements are never disabled on removal and secret versions are
    /// append-only.
    pub fn retain_on_delete(&self) -> bool {
        matches!(
            self,
            ResourceKind::CapabilityEnablement | ResourceKind::SecretVersion
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::CapabilityEnablement => "enablement",
            ResourceKind::ContainerImage => "image",
            ResourceKind::SecretContainer => "secret",
            ResourceKind::SecretVersion => "secret-version",
            ResourceKind::SecretAccessGrant => "secret-access",
            ResourceKind::ManagedService => "service",
            ResourceKind::InvocationGrant => "invoker",
        }
    }
}

/// One declared resource and its explicit ordering constraints.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, Value>,
    /// Resources that must be created/updated before this one.
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(name: &str, kind: ResourceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            properties: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if !self.depends_on.iter().any(|d| d == name) {
                self.depends_on.push(name.to_string());
            }
        }
        self
    }

    /// Every reference to another resource's output in this resource's inputs.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Look up a nested property, e.g. `template/containers/0/image`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let (head, rest) = path.split_once('/').unwrap_or((path, ""));
        self.properties.get(head)?.pointer(rest)
    }

    /// Properties as JSON with secrets fingerprinted.
    pub fn properties_json(&self) -> serde_json::Value {
        self.render_properties(SecretRendering::Fingerprint)
    }

    pub fn render_properties(&self, secrets: SecretRendering) -> serde_json::Value {
        serde_json::Value::Object(
            self.properties
                .iter()
                .map(|(k, v)| (k.clone(), v.render_json(secrets)))
                .collect(),
        )
    }
}

/// A stack output exported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct Output {
    pub name: String,
    pub value: Value,
    /// Deterministic value when it can be known before apply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretValue::new("hunter2");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.starts_with("SecretValue(sha256:"));
    }

    #[test]
    fn test_secret_json_is_fingerprint() {
        let value = Value::Secret(SecretValue::new("xyz"));
        let json = serde_json::to_string(&value).unwrap();
        assert!(!json.contains("\"xyz\""));
        assert!(json.contains("sha256:"));
    }

    #[test]
    fn test_revealed_secret_carries_plaintext() {
        let value = Value::map([("secretData", Value::Secret(SecretValue::new("xyz")))]);
        let json = value.render_json(SecretRendering::Reveal);
        assert_eq!(json["secretData"]["secret"], true);
        assert_eq!(json["secretData"]["value"], "xyz");
        assert_eq!(
            json["secretData"]["fingerprint"],
            SecretValue::new("xyz").fingerprint()
        );
        assert_eq!(
            value.to_json()["secretData"]["secret"],
            SecretValue::new("xyz").fingerprint()
        );
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(Reference::new("service", "uri").to_string(), "${service.uri}");
    }

    #[test]
    fn test_nested_lookup_and_references() {
        let resource = Resource::new("svc", ResourceKind::ManagedService).property(
            "template",
            Value::map([(
                "containers",
                Value::List(vec![Value::map([
                    ("image", Value::reference("image", "imageName")),
                    ("port", Value::Int(8080)),
                ])]),
            )]),
        );
        assert_eq!(
            resource.get("template/containers/0/port"),
            Some(&Value::Int(8080))
        );
        let refs = resource.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resource, "image");
    }

    #[test]
    fn test_depends_on_dedups() {
        let resource = Resource::new("a", ResourceKind::SecretVersion).depends_on(["x", "y", "x"]);
        assert_eq!(resource.depends_on, vec!["x", "y"]);
    }
}
