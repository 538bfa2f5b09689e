use crate::output::{print_json, print_table};
use anyhow::Context;
use prp_core::bus::{event_types, ScannerEvent};
use prp_core::config::Config;
use prp_core::decision::Decision;
use prp_core::orchestrator::{Orchestrator, OrchestratorStatus};
use std::path::{Path, PathBuf};

/// Run the full pipeline over `files`: parse, inspect on the worker pool,
/// decide, then shut the pool down.
pub fn run(
    config_path: &Path,
    files: &[PathBuf],
    priority: Option<u8>,
    json: bool,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given");
    }
    let config = Config::load(config_path).context("failed to load config")?;

    let rt = tokio::runtime::Runtime::new()?;
    let (decisions, status) = rt.block_on(async {
        let mut orchestrator = Orchestrator::start(&config)
            .await
            .context("failed to start orchestrator")?;
        let result = scan(&mut orchestrator, files, priority).await;
        let drained = orchestrator.drain().await;
        let status = orchestrator.status();
        if let Err(e) = orchestrator.shutdown().await {
            tracing::warn!("pool shutdown: {e}");
        }
        result?;
        anyhow::Ok((drained, status))
    })?;

    if json {
        let value = serde_json::json!({
            "decisions": decisions,
            "status": status,
        });
        print_json(&value)?;
    } else {
        print_decisions(&decisions);
        println!();
        print_status(&status);
    }
    Ok(())
}

async fn scan(
    orchestrator: &mut Orchestrator,
    files: &[PathBuf],
    priority: Option<u8>,
) -> anyhow::Result<usize> {
    let mut submitted = 0;
    for path in files {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut event = ScannerEvent::new(
            event_types::SCAN_COMPLETED,
            serde_json::json!({ "path": path.display().to_string(), "content": content }),
        )
        .with_source("prp-cli");
        if let Some(p) = priority {
            event = event.with_priority(p);
        }
        submitted += orchestrator.handle_scan_event(event).await?;
    }
    tracing::info!(submitted, "scan submitted");
    Ok(submitted)
}

fn print_decisions(decisions: &[Decision]) {
    if decisions.is_empty() {
        println!("No signals to act on.");
        return;
    }
    let rows = decisions
        .iter()
        .map(|d| {
            vec![
                d.prp.clone(),
                d.kind.to_string(),
                d.role.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                d.budget_tokens.to_string(),
                d.reason.clone(),
            ]
        })
        .collect();
    print_table(&["PRP", "DECISION", "ROLE", "BUDGET", "REASON"], rows);
}

fn print_status(status: &OrchestratorStatus) {
    println!("Signals:   {}", status.signals_seen);
    println!(
        "Pool:      {} completed, {} failed (peak {} in flight)",
        status.pool.completed, status.pool.failed, status.pool.max_in_flight
    );
    println!(
        "Tokens:    {} used, {} active alert(s)",
        status.tokens.total_usage, status.active_alerts
    );
    let counts: Vec<String> = status
        .decisions
        .iter()
        .map(|(kind, n)| format!("{kind}={n}"))
        .collect();
    if !counts.is_empty() {
        println!("Decisions: {}", counts.join(" "));
    }
}
