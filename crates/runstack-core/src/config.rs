//! stack.toml configuration parser.
//!
//! A stack file names the workload, the platform APIs it needs, one secret,
//! and the provider scope. Everything else has defaults matching a small
//! web service: 2Gi / 1 CPU, port 1323, a 5 second request timeout, the
//! secret mounted under `/secret`, and public invocation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::image::ImageRef;
use crate::types::SecretValue;

static STACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").unwrap());
// Non-empty, no whitespace.
static CAPABILITY_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\S+$").unwrap());
static SECRET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").unwrap());
static SERVICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z](?:[-a-z0-9]{0,47}[a-z0-9])?$").unwrap());
static MEMORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*(?:Mi|Gi|M|G)$").unwrap());

/// Longest request timeout the hosting platform accepts.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackSection,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub names: ResourceNames,
    #[serde(default)]
    pub roles: RoleConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub ordering: OrderingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSection {
    pub name: String,
    #[serde(alias = "requiredServices")]
    pub required_services: Vec<String>,
    /// Collapse repeated capability ids instead of rejecting them.
    #[serde(default = "default_true")]
    pub dedup_services: bool,
    pub secret: SecretConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Read the value from this environment variable instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub project: String,
    pub region: String,
    /// Numeric project id. Used to derive the default compute identity and
    /// to predict the service URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub context: String,
    pub platform: String,
    pub registry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            context: "./app".to_string(),
            platform: "linux/amd64".to_string(),
            registry: "gcr.io".to_string(),
            tag: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub memory: String,
    pub cpu: String,
    pub port: u16,
    /// Requests running longer than this are cut off by the platform.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub min_instances: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    /// Env var that carries the mounted secret's file path.
    pub secret_env: String,
    pub mount_path: String,
    pub volume_name: String,
    /// Secret version alias the volume pins to.
    pub secret_version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "test".to_string(),
            memory: "2Gi".to_string(),
            cpu: "1".to_string(),
            port: 1323,
            timeout: Duration::from_secs(5),
            min_instances: 0,
            max_instances: None,
            secret_env: "SECRET_PATH".to_string(),
            mount_path: "/secret".to_string(),
            volume_name: "secret-mount".to_string(),
            secret_version: "latest".to_string(),
        }
    }
}

/// Logical resource names used in the declared graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceNames {
    pub enablement_prefix: String,
    pub image: String,
    pub secret: String,
    pub secret_version: String,
    pub secret_member: String,
    pub service: String,
    pub invoker: String,
}

impl Default for ResourceNames {
    fn default() -> Self {
        Self {
            enablement_prefix: "enable".to_string(),
            image: "image".to_string(),
            secret: "secret".to_string(),
            secret_version: "secret-version".to_string(),
            secret_member: "secret-member".to_string(),
            service: "service".to_string(),
            invoker: "invoker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub secret_accessor: String,
    pub invoker: String,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            secret_accessor: "roles/secretmanager.secretAccessor".to_string(),
            invoker: "roles/run.invoker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Declare an invocation grant for `invoker_member`.
    pub public: bool,
    pub invoker_member: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            public: true,
            invoker_member: "allUsers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity granted secret access. Derived from the project number when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingConfig {
    /// Order the access grant after the secret version and the service
    /// after the grant. When off, the grant floats outside the chain.
    pub explicit_access_grant: bool,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            explicit_access_grant: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl StackConfig {
    /// Load, parse, and validate a stack file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        debug!(?path, stack = %config.stack.name, "stack config loaded");
        Ok(config)
    }

    /// Parse and validate stack TOML.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: StackConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a stack file whose secret value comes from the environment.
    pub fn scaffold(name: &str, project: &str, region: &str) -> Self {
        StackConfig {
            stack: StackSection {
                name: name.to_string(),
                required_services: vec![
                    "run.googleapis.com".to_string(),
                    "secretmanager.googleapis.com".to_string(),
                ],
                dedup_services: true,
                secret: SecretConfig {
                    name: format!("{name}-secret"),
                    value: None,
                    value_env: Some("STACK_SECRET".to_string()),
                },
            },
            provider: ProviderConfig {
                project: project.to_string(),
                region: region.to_string(),
                project_number: None,
            },
            image: ImageConfig::default(),
            service: ServiceConfig::default(),
            names: ResourceNames::default(),
            roles: RoleConfig::default(),
            access: AccessConfig::default(),
            identity: IdentityConfig::default(),
            ordering: OrderingConfig::default(),
        }
    }

    /// Check every field the graph builder relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        let stack = &self.stack;
        if stack.name.is_empty() {
            return Err(ConfigError::Missing("stack.name"));
        }
        if !STACK_NAME.is_match(&stack.name) {
            return Err(ConfigError::invalid(
                "stack.name",
                format!("{:?} is not a valid image name", stack.name),
            ));
        }

        let mut seen = HashSet::new();
        for id in &stack.required_services {
            if !CAPABILITY_ID.is_match(id) {
                return Err(ConfigError::invalid(
                    "stack.required_services",
                    format!("{id:?} must be non-empty without whitespace"),
                ));
            }
            if !seen.insert(id.as_str()) && !stack.dedup_services {
                return Err(ConfigError::invalid(
                    "stack.required_services",
                    format!("{id:?} listed more than once"),
                ));
            }
        }

        if !SECRET_ID.is_match(&stack.secret.name) {
            return Err(ConfigError::invalid(
                "stack.secret.name",
                format!("{:?} is not a valid secret id", stack.secret.name),
            ));
        }
        // The env var itself is read at evaluation time.
        match (&stack.secret.value, &stack.secret.value_env) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    "stack.secret",
                    "set either value or value_env, not both",
                ));
            }
            (None, None) => return Err(ConfigError::Missing("stack.secret.value")),
            (None, Some(var)) if var.is_empty() => {
                return Err(ConfigError::Missing("stack.secret.value_env"));
            }
            _ => {}
        }

        if self.provider.project.is_empty() {
            return Err(ConfigError::Missing("provider.project"));
        }
        if self.provider.region.is_empty() {
            return Err(ConfigError::Missing("provider.region"));
        }
        if let Some(number) = &self.provider.project_number
            && (number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(ConfigError::invalid(
                "provider.project_number",
                format!("{number:?} is not numeric"),
            ));
        }

        let image = ImageRef::for_stack(self).to_string();
        ImageRef::parse(&image).map_err(|e| ConfigError::invalid("image", e.to_string()))?;

        self.validate_service()?;

        if self.access.public && self.access.invoker_member.is_empty() {
            return Err(ConfigError::Missing("access.invoker_member"));
        }
        if let Some(account) = &self.identity.service_account
            && !account.contains('@')
        {
            return Err(ConfigError::invalid(
                "identity.service_account",
                format!("{account:?} is not an email address"),
            ));
        }
        Ok(())
    }

    fn validate_service(&self) -> ConfigResult<()> {
        let svc = &self.service;
        if !SERVICE_NAME.is_match(&svc.name) {
            return Err(ConfigError::invalid(
                "service.name",
                format!("{:?} is not a valid service name", svc.name),
            ));
        }
        if !MEMORY.is_match(&svc.memory) {
            return Err(ConfigError::invalid(
                "service.memory",
                format!("{:?} is not a memory quantity", svc.memory),
            ));
        }
        match svc.cpu.parse::<f64>() {
            Ok(cpu) if cpu > 0.0 => {}
            _ => {
                return Err(ConfigError::invalid(
                    "service.cpu",
                    format!("{:?} is not a positive cpu count", svc.cpu),
                ));
            }
        }
        if svc.port == 0 {
            return Err(ConfigError::invalid("service.port", "must be non-zero"));
        }
        if svc.timeout.is_zero() || svc.timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::invalid(
                "service.timeout",
                format!("{:?} is outside (0s, 1h]", svc.timeout),
            ));
        }
        if let Some(max) = svc.max_instances
            && max < svc.min_instances
        {
            return Err(ConfigError::invalid(
                "service.max_instances",
                format!("{max} is below min_instances {}", svc.min_instances),
            ));
        }
        if !svc.mount_path.starts_with('/') {
            return Err(ConfigError::invalid(
                "service.mount_path",
                "must be an absolute path",
            ));
        }
        if svc.secret_env.is_empty() {
            return Err(ConfigError::Missing("service.secret_env"));
        }
        Ok(())
    }

    /// Resolve the secret value from the file or the environment.
    pub fn secret_value(&self) -> ConfigResult<SecretValue> {
        let secret = &self.stack.secret;
        match (&secret.value, &secret.value_env) {
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "stack.secret",
                "set either value or value_env, not both",
            )),
            (Some(value), None) => Ok(SecretValue::new(value.clone())),
            (None, Some(var)) => std::env::var(var)
                .map(SecretValue::new)
                .map_err(|_| ConfigError::EnvVar(var.clone())),
            (None, None) => Err(ConfigError::Missing("stack.secret.value")),
        }
    }

    /// Required capability ids in declaration order, duplicates dropped.
    pub fn required_capabilities(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.stack.required_services.len());
        for id in &self.stack.required_services {
            if seen.insert(id.as_str()) {
                out.push(id.as_str());
            } else {
                warn!(capability = %id, "duplicate required service ignored");
            }
        }
        out
    }

    /// File path the workload reads the secret from.
    pub fn secret_file_path(&self) -> String {
        format!(
            "{}/{}",
            self.service.mount_path.trim_end_matches('/'),
            self.stack.secret.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[stack]
name = "svc1"
required_services = ["run.googleapis.com"]

[stack.secret]
name = "api-key"
value = "xyz"

[provider]
project = "proj1"
region = "us-central1"
"#;

    #[test]
    fn test_parse_minimal_applies_defaults() {
        let config = StackConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.stack.name, "svc1");
        assert_eq!(config.service.name, "test");
        assert_eq!(config.service.port, 1323);
        assert_eq!(config.service.timeout, Duration::from_secs(5));
        assert_eq!(config.image.context, "./app");
        assert!(config.access.public);
        assert!(config.ordering.explicit_access_grant);
        assert_eq!(config.secret_file_path(), "/secret/api-key");
    }

    #[test]
    fn test_from_file_round_trips_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        let scaffold = StackConfig::scaffold("svc1", "proj1", "us-central1");
        std::fs::write(&path, scaffold.to_toml_string().unwrap()).unwrap();

        let config = StackConfig::from_file(&path).unwrap();
        assert_eq!(config.stack.secret.name, "svc1-secret");
        assert_eq!(config.service.timeout, Duration::from_secs(5));
        assert_eq!(config.required_capabilities().len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = StackConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_camel_case_alias() {
        let toml_str = MINIMAL.replace("required_services", "requiredServices");
        let config = StackConfig::parse(&toml_str).unwrap();
        assert_eq!(config.stack.required_services, vec!["run.googleapis.com"]);
    }

    #[test]
    fn test_missing_provider_fails() {
        let toml_str = MINIMAL.replace("[provider]\nproject = \"proj1\"\nregion = \"us-central1\"\n", "");
        let err = StackConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_timeout_is_configurable() {
        let toml_str = format!("{MINIMAL}\n[service]\ntimeout = \"90s\"\n");
        let config = StackConfig::parse(&toml_str).unwrap();
        assert_eq!(config.service.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_rejects_zero_port() {
        let toml_str = format!("{MINIMAL}\n[service]\nport = 0\n");
        let err = StackConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "service.port", .. }));
    }

    #[test]
    fn test_rejects_bad_memory() {
        let toml_str = format!("{MINIMAL}\n[service]\nmemory = \"lots\"\n");
        assert!(StackConfig::parse(&toml_str).is_err());
    }

    #[test]
    fn test_duplicates_rejected_without_dedup() {
        let toml_str = MINIMAL.replace(
            "required_services = [\"run.googleapis.com\"]",
            "required_services = [\"run.googleapis.com\", \"run.googleapis.com\"]\ndedup_services = false",
        );
        let err = StackConfig::parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_duplicates_collapsed_with_dedup() {
        let toml_str = MINIMAL.replace(
            "required_services = [\"run.googleapis.com\"]",
            "required_services = [\"b.googleapis.com\", \"a.googleapis.com\", \"b.googleapis.com\"]",
        );
        let config = StackConfig::parse(&toml_str).unwrap();
        assert_eq!(
            config.required_capabilities(),
            vec!["b.googleapis.com", "a.googleapis.com"]
        );
    }

    #[test]
    fn test_bare_service_ids_accepted() {
        let toml_str = MINIMAL.replace(
            "required_services = [\"run.googleapis.com\"]",
            "required_services = [\"a\", \"b\", \"c\"]",
        );
        let config = StackConfig::parse(&toml_str).unwrap();
        assert_eq!(config.required_capabilities(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_blank_service_ids_rejected() {
        for bad in ["\"\"", "\"run googleapis\""] {
            let toml_str = MINIMAL.replace(
                "[\"run.googleapis.com\"]",
                &format!("[{bad}]"),
            );
            let err = StackConfig::parse(&toml_str).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: "stack.required_services", .. }),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn test_image_reference_checked() {
        let toml_str = format!("{MINIMAL}\n[image]\nregistry = \"\"\n");
        let err = StackConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "image", .. }));

        let toml_str = format!("{MINIMAL}\n[image]\ntag = \"\"\n");
        assert!(StackConfig::parse(&toml_str).is_err());

        let toml_str = format!("{MINIMAL}\n[image]\ntag = \"v2\"\n");
        assert!(StackConfig::parse(&toml_str).is_ok());
    }

    #[test]
    fn test_secret_value_and_env_are_exclusive() {
        let toml_str = MINIMAL.replace("value = \"xyz\"", "value = \"xyz\"\nvalue_env = \"X\"");
        assert!(StackConfig::parse(&toml_str).is_err());
    }

    #[test]
    fn test_missing_secret_value() {
        let toml_str = MINIMAL.replace("value = \"xyz\"\n", "");
        let err = StackConfig::parse(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("stack.secret.value")));
    }

    #[test]
    fn test_unset_env_var_fails_at_resolution_only() {
        let toml_str = MINIMAL.replace(
            "value = \"xyz\"",
            "value_env = \"RUNSTACK_TEST_UNSET_SECRET\"",
        );
        let config = StackConfig::parse(&toml_str).unwrap();
        let err = config.secret_value().unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar(var) if var == "RUNSTACK_TEST_UNSET_SECRET"));
    }

    #[test]
    fn test_scaffold_renders() {
        let config = StackConfig::scaffold("my-api", "proj1", "europe-west1");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("my-api"));
        assert!(toml_str.contains("value_env = \"STACK_SECRET\""));
        assert!(toml_str.contains("timeout = \"5s\""));
    }
}
