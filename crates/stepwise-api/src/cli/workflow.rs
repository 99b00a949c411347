//! CLI workflow subcommands.
//!
//! Provides start, status, list, resume, cancel, retry, signal and types.
//! Every command prints styled text, or pretty JSON with `--json`.

use anyhow::{Context as _, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use serde_json::Value;
use uuid::Uuid;

use stepwise_types::workflow::{
    Context, StartOptions, Workflow, WorkflowAction, WorkflowStatus, WorkflowStatusReport,
};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

pub async fn start(
    state: &AppState,
    workflow_type: &str,
    context: Option<&str>,
    correlation_id: Option<String>,
    json: bool,
) -> Result<()> {
    let context = match context {
        Some(raw) => parse_context(raw)?,
        None => Context::new(),
    };
    let options = StartOptions {
        correlation_id,
        triggered_by: std::env::var("USER").ok(),
        trigger_type: Some("cli".to_string()),
    };

    let workflow = state
        .machine
        .start_workflow(workflow_type, context, options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Started workflow '{}'",
        style("*").green().bold(),
        style(&workflow.workflow_type).cyan()
    );
    println!("  ID:          {}", workflow.id);
    println!("  Correlation: {}", workflow.correlation_id);
    println!("  Status:      {}", styled_status(workflow.status));
    println!();
    println!(
        "  Check progress: {}",
        style(format!("stepwise status {}", workflow.id)).dim()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn status(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let report = state.machine.status(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &WorkflowStatusReport) {
    println!();
    println!(
        "  {} {}",
        style("Workflow").bold(),
        style(report.workflow_id).cyan()
    );
    println!("  Type:        {}", report.workflow_type);
    println!("  Correlation: {}", report.correlation_id);
    println!("  Status:      {}", styled_status(report.status));
    println!(
        "  Progress:    {}/{} actions",
        report.completed_actions, report.total_actions
    );
    if let Some(current) = &report.current_action {
        println!(
            "  Current:     {} (index {})",
            style(current).yellow(),
            report.current_action_index
        );
    }
    println!("  Updated:     {}", report.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!();

    if report.actions.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Action"),
            Cell::new("Group"),
            Cell::new("Mode"),
            Cell::new("State"),
            Cell::new("Retries"),
            Cell::new("ID"),
        ]);
    for action in &report.actions {
        table.add_row(vec![
            Cell::new(action.index),
            Cell::new(&action.action_key),
            Cell::new(if action.is_concurrent {
                format!("{} (concurrent)", action.group_index)
            } else {
                action.group_index.to_string()
            }),
            Cell::new(action.mode.label()),
            action_state_cell(action),
            Cell::new(format!("{}/{}", action.retry_count, action.max_retries)),
            Cell::new(action.id),
        ]);
    }
    println!("{table}");

    for action in report.actions.iter().filter(|a| a.exception.is_some()) {
        if let Some(failure) = &action.exception {
            println!(
                "  {} {}: {} ({})",
                style("!").red().bold(),
                action.action_key,
                style(&failure.message).red(),
                failure.category
            );
        }
    }
    println!();
}

fn action_state_cell(action: &WorkflowAction) -> Cell {
    if action.is_complete() {
        Cell::new("completed").fg(Color::Green)
    } else if action.exception.is_some() {
        Cell::new("failed").fg(Color::Red)
    } else if action.is_in_flight() {
        Cell::new("in flight").fg(Color::Blue)
    } else {
        Cell::new("pending").fg(Color::DarkGrey)
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, status: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let status = status
        .map(str::parse::<WorkflowStatus>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let workflows = state.machine.list(status, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows found.");
        println!(
            "  Start one with: {}",
            style("stepwise start <type>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Index"),
            Cell::new("Correlation"),
            Cell::new("Updated"),
        ]);
    for workflow in &workflows {
        table.add_row(vec![
            Cell::new(workflow.id),
            Cell::new(&workflow.workflow_type),
            status_cell(workflow.status),
            Cell::new(workflow.current_action_index),
            Cell::new(&workflow.correlation_id),
            Cell::new(workflow.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Operator transitions
// ---------------------------------------------------------------------------

pub async fn resume(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let workflow = state.machine.resume(id).await?;
    print_transition(&workflow, "Resumed", json)
}

pub async fn cancel(state: &AppState, id: Uuid, yes: bool, json: bool) -> Result<()> {
    if !yes && !json {
        let workflow = state.machine.status(id).await?;
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Cancel workflow {} ({}, {})?",
                style(id).red().bold(),
                workflow.workflow_type,
                workflow.status
            ))
            .default(false)
            .interact()
            .context("confirmation prompt failed (use --yes to skip it)")?;
        if !confirmed {
            println!("  Aborted.");
            return Ok(());
        }
    }

    let workflow = state.machine.cancel(id).await?;
    print_transition(&workflow, "Cancelled", json)
}

pub async fn retry(state: &AppState, id: Uuid, from_action: Option<u32>, json: bool) -> Result<()> {
    let workflow = state.machine.retry(id, from_action).await?;
    print_transition(&workflow, "Retried", json)
}

pub async fn signal(
    state: &AppState,
    workflow_id: Uuid,
    action_id: Uuid,
    result: Option<&str>,
    json: bool,
) -> Result<()> {
    let result = match result {
        Some(raw) => serde_json::from_str::<Value>(raw).context("--result is not valid JSON")?,
        None => Value::Null,
    };
    let workflow = state.machine.signal(workflow_id, action_id, result).await?;
    print_transition(&workflow, "Signalled", json)
}

fn print_transition(workflow: &Workflow, verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(workflow)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} {} workflow {}",
        style("*").green().bold(),
        verb,
        style(workflow.id).cyan()
    );
    println!("  Status: {}", styled_status(workflow.status));
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

pub fn types(state: &AppState, json: bool) -> Result<()> {
    let types = state.workflow_types();

    if json {
        println!("{}", serde_json::to_string_pretty(&types)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Actions"),
        ]);
    for summary in &types {
        table.add_row(vec![
            Cell::new(&summary.workflow_type),
            Cell::new(&summary.name),
            Cell::new(summary.actions.join(" → ")),
        ]);
    }
    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse `--context`, which must be a JSON object.
pub fn parse_context(raw: &str) -> Result<Context> {
    match serde_json::from_str::<Value>(raw).context("--context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}

fn styled_status(status: WorkflowStatus) -> console::StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        WorkflowStatus::Completed => style(text).green(),
        WorkflowStatus::Paused => style(text).magenta(),
        WorkflowStatus::Failed => style(text).red(),
        WorkflowStatus::Cancelled => style(text).yellow(),
        WorkflowStatus::Waiting | WorkflowStatus::Processing => style(text).blue(),
        WorkflowStatus::Created => style(text).dim(),
    }
}

pub(crate) fn status_cell(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        WorkflowStatus::Created => cell.fg(Color::DarkGrey),
        WorkflowStatus::Processing => cell.fg(Color::Blue),
        WorkflowStatus::Waiting => cell.fg(Color::Cyan),
        WorkflowStatus::Paused => cell.fg(Color::Magenta),
        WorkflowStatus::Completed => cell.fg(Color::Green),
        WorkflowStatus::Failed => cell.fg(Color::Red),
        WorkflowStatus::Cancelled => cell.fg(Color::DarkYellow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_context_accepts_object() {
        let ctx = parse_context(r#"{"user_id": 123}"#).unwrap();
        assert_eq!(ctx.get("user_id"), Some(&json!(123)));
    }

    #[test]
    fn parse_context_rejects_non_object() {
        let err = parse_context("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("JSON object"));
        assert!(parse_context("{oops").is_err());
    }

    #[tokio::test]
    async fn start_then_signal_completes_review() {
        let mut config = stepwise_types::config::OrchestratorConfig::default();
        config.workflows.push(
            stepwise_types::definition::WorkflowDefinition::builder("review")
                .then("approval")
                .build(),
        );
        let state = crate::state::test_support::state_with(config).await;

        start(&state, "review", Some(r#"{"doc": 1}"#), None, true)
            .await
            .unwrap();
        let workflow = state
            .machine
            .list(Some(WorkflowStatus::Waiting), 1)
            .await
            .unwrap()
            .remove(0);
        let report = state.machine.status(workflow.id).await.unwrap();

        signal(&state, workflow.id, report.actions[0].id, Some(r#"{"ok":true}"#), true)
            .await
            .unwrap();

        let report = state.machine.status(workflow.id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.actions[0].result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn cancel_with_yes_skips_prompt() {
        let state = crate::state::test_support::state().await;
        let workflow = state
            .machine
            .start_workflow("demo", Context::new(), StartOptions::default())
            .await
            .unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Waiting);

        cancel(&state, workflow.id, true, false).await.unwrap();

        let report = state.machine.status(workflow.id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_rejects_unknown_status() {
        let state = crate::state::test_support::state().await;
        assert!(list(&state, Some("bogus"), 10, true).await.is_err());
    }
}
