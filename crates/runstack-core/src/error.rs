//! Error types for config loading and graph construction.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a stack configuration.
///
/// All of these surface before any resource is declared.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stack config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render stack config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("missing required config value: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("environment variable {0} is not set")]
    EnvVar(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while assembling a resource graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("resource declared twice: {0}")]
    DuplicateResource(String),

    #[error("resource {resource} depends on undeclared resource {dependency}")]
    UnknownDependency { resource: String, dependency: String },

    #[error("resource {resource} references undeclared resource {target}")]
    UnknownReference { resource: String, target: String },

    #[error("dependency cycle through resource {0}")]
    Cycle(String),

    #[error("identity resolution failed: {0}")]
    Identity(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type GraphResult<T> = Result<T, GraphError>;
