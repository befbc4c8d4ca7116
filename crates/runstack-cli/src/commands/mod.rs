pub mod deploy;
pub mod ledger;
pub mod stack;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use runstack_core::{StackConfig, StackGraph, evaluate, resolver_for};
use runstack_state::StateStore;
use tracing::debug;

/// File name of the ledger inside the state directory.
pub const LEDGER_FILE: &str = "runstack.redb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Json,
    Dot,
}

/// Paths every command works against.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
}

impl Workspace {
    pub fn new(config_path: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_path,
            state_dir,
        }
    }

    pub fn load_config(&self) -> anyhow::Result<StackConfig> {
        StackConfig::from_file(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path.display()))
    }

    /// Directory relative paths in the stack file resolve against.
    pub fn base_dir(&self) -> &Path {
        self.config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    }

    /// Load the stack file and evaluate it into a graph.
    pub async fn evaluate(&self) -> anyhow::Result<(StackConfig, StackGraph)> {
        let config = self.load_config()?;
        let resolver = resolver_for(&config);
        let graph = evaluate(&config, resolver.as_ref())
            .await
            .with_context(|| format!("evaluating stack {}", config.stack.name))?;
        Ok((config, graph))
    }

    /// Open the ledger, creating the state directory on first use.
    pub fn ledger(&self) -> anyhow::Result<StateStore> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("creating {}", self.state_dir.display()))?;
        let path = self.state_dir.join(LEDGER_FILE);
        debug!(path = %path.display(), "opening ledger");
        StateStore::open(&path).with_context(|| format!("opening ledger {}", path.display()))
    }
}
