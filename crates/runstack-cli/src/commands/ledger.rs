//! `runstack outputs` and `runstack history`, read straight from the ledger.

use std::fmt::Write as _;

use anyhow::bail;
use runstack_state::{OutputRecord, SecretVersionRecord, StackRecord, StateStore};
use serde::Serialize;

use super::{OutputFormat, Workspace};

pub fn outputs(workspace: &Workspace, format: OutputFormat) -> anyhow::Result<()> {
    let stack = workspace.load_config()?.stack.name;
    let outputs = workspace.ledger()?.list_outputs(&stack)?;
    if outputs.is_empty() {
        bail!("stack {stack} has not been committed");
    }
    match format {
        OutputFormat::Json => {
            let values: serde_json::Map<String, serde_json::Value> = outputs
                .iter()
                .map(|o| (o.name.clone(), serde_json::Value::String(o.display_value())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&values)?);
        }
        OutputFormat::Text => print!("{}", format_outputs(&outputs)),
    }
    Ok(())
}

fn format_outputs(outputs: &[OutputRecord]) -> String {
    let mut out = String::new();
    for output in outputs {
        let _ = writeln!(out, "{:<8} {}", output.name, output.display_value());
    }
    out
}

#[derive(Debug, Serialize)]
struct History {
    stack: Option<StackRecord>,
    secret_versions: Vec<SecretVersionRecord>,
}

fn load_history(ledger: &StateStore, stack: &str) -> anyhow::Result<History> {
    Ok(History {
        stack: ledger.stack_record(stack)?,
        secret_versions: ledger.all_secret_versions(stack)?,
    })
}

pub fn history(workspace: &Workspace, format: OutputFormat) -> anyhow::Result<()> {
    let stack = workspace.load_config()?.stack.name;
    let history = load_history(&workspace.ledger()?, &stack)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
        OutputFormat::Text => print!("{}", format_history(&stack, &history)),
    }
    Ok(())
}

fn format_history(stack: &str, history: &History) -> String {
    let mut out = String::new();
    match &history.stack {
        Some(record) => {
            let _ = writeln!(
                out,
                "Stack {} serial {} ({} resources, secret {}) committed at {}",
                record.name, record.serial, record.resources, record.secret_phase, record.committed_at
            );
        }
        None => {
            let _ = writeln!(out, "Stack {stack} has no commits.");
            return out;
        }
    }
    if !history.secret_versions.is_empty() {
        let _ = writeln!(out, "\nSecret versions:");
    }
    for version in &history.secret_versions {
        let _ = writeln!(
            out,
            "  {}#{:<4} {}  {}",
            version.resource, version.version, version.fingerprint, version.created_at
        );
    }
    out
}
