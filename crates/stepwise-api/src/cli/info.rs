//! System overview command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Workflow counts by status, pending callbacks, registered types and paths.
pub async fn info(state: &AppState, json: bool) -> Result<()> {
    let counts = state.machine.repo().status_counts().await?;
    let pending = state.callbacks.pending_count().await?;
    let types = state.machine.registry().len();
    let total: u64 = counts.iter().map(|(_, n)| n).sum();

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.as_str().to_string(), (*n).into()))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "driver": state.config.dispatch.driver,
            "workflow_types": types,
            "workflows": {
                "total": total,
                "by_status": by_status,
            },
            "pending_callbacks": pending,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Stepwise v{}",
        style("*").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Total:   {}", style(total).bold());
    for (status, n) in &counts {
        println!("  {:<8} {}", format!("{status}:"), n);
    }
    println!();

    println!("  {}", style("── Dispatch ──").dim());
    println!("  Driver:            {:?}", state.config.dispatch.driver);
    println!("  Pending callbacks: {}", style(pending).bold());
    println!("  Workflow types:    {types}");
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
