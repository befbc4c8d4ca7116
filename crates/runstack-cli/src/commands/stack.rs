//! `runstack init`, `validate` and `graph`.

use std::fmt::Write as _;

use anyhow::{Context, bail};
use runstack_core::{StackConfig, StackGraph};
use tracing::{info, warn};

use super::{GraphFormat, Workspace};

pub fn init(
    workspace: &Workspace,
    name: &str,
    project: &str,
    region: &str,
    force: bool,
) -> anyhow::Result<()> {
    let path = &workspace.config_path;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = StackConfig::scaffold(name, project, region);
    config
        .validate()
        .with_context(|| format!("scaffold for {name:?} is not valid"))?;
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("✓ Generated {}", path.display());
    if let Some(var) = &config.stack.secret.value_env {
        println!("  Secret value is read from ${var}");
    }
    Ok(())
}

pub async fn validate(workspace: &Workspace) -> anyhow::Result<()> {
    let (config, graph) = workspace.evaluate().await?;

    let context = workspace.base_dir().join(&config.image.context);
    if !context.is_dir() {
        warn!(path = %context.display(), "image build context not found");
    }

    let gaps = graph.ordering_gaps();
    for gap in &gaps {
        warn!(%gap, "ordering gap");
    }
    info!(stack = %graph.stack(), gaps = gaps.len(), "stack validated");

    println!(
        "✓ {} is valid ({} resources, {} waves)",
        workspace.config_path.display(),
        graph.len(),
        graph.waves().len()
    );
    if !gaps.is_empty() {
        println!("  {} ordering gap(s); see warnings", gaps.len());
    }
    Ok(())
}

pub async fn graph(
    workspace: &Workspace,
    format: GraphFormat,
    reveal_secrets: bool,
) -> anyhow::Result<()> {
    let (_, graph) = workspace.evaluate().await?;
    if reveal_secrets && format != GraphFormat::Json {
        warn!("--reveal-secrets only applies to --format json");
    }
    match format {
        GraphFormat::Text => print!("{}", format_graph(&graph)),
        GraphFormat::Json => println!("{}", render_json(&graph, reveal_secrets)?),
        GraphFormat::Dot => print!("{}", graph.to_dot()),
    }
    Ok(())
}

fn render_json(graph: &StackGraph, reveal_secrets: bool) -> serde_json::Result<String> {
    if reveal_secrets {
        serde_json::to_string_pretty(&graph.engine_document())
    } else {
        serde_json::to_string_pretty(&graph.document())
    }
}

/// Resources grouped by apply wave, then outputs and gaps.
pub fn format_graph(graph: &StackGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stack {} ({} resources)", graph.stack(), graph.len());

    for (i, wave) in graph.waves().iter().enumerate() {
        let _ = writeln!(out, "\nWave {}:", i + 1);
        for resource in wave {
            let _ = write!(
                out,
                "  {:<32} {:<14} {}",
                resource.name,
                resource.kind.label(),
                resource.kind.type_token()
            );
            let deps = graph.dependencies_of(&resource.name);
            if !deps.is_empty() {
                let _ = write!(out, "  <- {}", deps.join(", "));
            }
            out.push('\n');
        }
    }

    let _ = writeln!(out, "\nOutputs:");
    for output in graph.outputs() {
        let value = output.value.to_json();
        let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
        let _ = write!(out, "  {} = {}", output.name, value);
        if let Some(predicted) = &output.predicted {
            let _ = write!(out, " (predicted {predicted})");
        }
        out.push('\n');
    }

    let gaps = graph.ordering_gaps();
    if !gaps.is_empty() {
        let _ = writeln!(out, "\nOrdering gaps:");
        for gap in gaps {
            let _ = writeln!(out, "  ! {gap}");
        }
    }
    out
}
