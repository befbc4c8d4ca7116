//! `runstack plan` and `runstack commit`.

use std::fmt::Write as _;

use runstack_state::{CommitReport, format_plan};

use super::{OutputFormat, Workspace};

pub async fn plan(workspace: &Workspace, format: OutputFormat) -> anyhow::Result<()> {
    let (_, graph) = workspace.evaluate().await?;
    let ledger = workspace.ledger()?;
    let plan = ledger.plan(&graph)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => print!("{}", format_plan(&plan)),
    }
    Ok(())
}

pub async fn commit(workspace: &Workspace) -> anyhow::Result<()> {
    let report = run_commit(workspace).await?;
    print!("{}", format_report(&report));
    Ok(())
}

async fn run_commit(workspace: &Workspace) -> anyhow::Result<CommitReport> {
    let (_, graph) = workspace.evaluate().await?;
    let ledger = workspace.ledger()?;
    let plan = ledger.plan(&graph)?;
    print!("{}", format_plan(&plan));
    Ok(ledger.commit(&graph, &plan)?)
}

fn format_report(report: &CommitReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n✓ Committed {} (serial {})",
        report.stack, report.serial
    );
    let _ = writeln!(
        out,
        "  {} created, {} updated, {} replaced, {} deleted, {} retained",
        report.created, report.updated, report.replaced, report.deleted, report.retained
    );
    for version in &report.new_secret_versions {
        let _ = writeln!(out, "  Secret version {version} recorded");
    }
    let _ = writeln!(out, "  Secret phase: {}", report.secret_phase);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures;

    #[tokio::test]
    async fn second_commit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixtures::workspace(dir.path(), fixtures::STACK);

        let first = run_commit(&ws).await.unwrap();
        assert_eq!(first.serial, 1);
        assert_eq!(first.created, 7);
        assert_eq!(first.new_secret_versions, vec![1]);

        let (_, graph) = ws.evaluate().await.unwrap();
        let plan = ws.ledger().unwrap().plan(&graph).unwrap();
        assert!(!plan.has_changes());

        let second = run_commit(&ws).await.unwrap();
        assert_eq!(second.serial, 2);
        assert_eq!(second.created, 0);
        assert!(second.new_secret_versions.is_empty());
    }

    #[tokio::test]
    async fn rotated_secret_adds_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let ws = fixtures::workspace(dir.path(), fixtures::STACK);
        run_commit(&ws).await.unwrap();

        fixtures::workspace(dir.path(), &fixtures::STACK.replace("\"xyz\"", "\"abc\""));
        let report = run_commit(&ws).await.unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(report.new_secret_versions, vec![2]);
        assert!(format_report(&report).contains("Secret version 2 recorded"));
    }
}
