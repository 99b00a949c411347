//! Built-in actions and workflow types shipped with the `stepwise` binary.
//!
//! These make configured workflows runnable without writing Rust: a TOML
//! definition can chain any of the keys below.

use std::time::Duration;

use serde_json::{Value, json};
use stepwise_core::action::{Action, ActionContext, ActionError, ActionOutput, ActionRegistry};
use stepwise_types::definition::WorkflowDefinition;
use stepwise_types::retry::RetryPolicy;
use stepwise_types::workflow::ExecutionMode;

/// How long `approval` waits for a signal before falling back to `noop`.
const APPROVAL_TIMEOUT_SECS: u64 = 3600;

/// Longest sleep `delay` accepts.
const MAX_DELAY_MS: u64 = 60_000;

pub fn registry() -> ActionRegistry {
    ActionRegistry::new()
        .with("noop", || Noop)
        .with("echo", || Echo)
        .with("log", || Log)
        .with("delay", || Delay)
        .with("queued-echo", || QueuedEcho)
        .with("approval", || Approval)
        .with("fail", || Fail)
}

pub fn definitions() -> Vec<WorkflowDefinition> {
    vec![
        WorkflowDefinition::builder("demo")
            .name("Built-in demo")
            .then("noop")
            .concurrent(["echo", "queued-echo"])
            .build(),
    ]
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

struct Noop;

impl Action for Noop {
    async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new(Value::Null))
    }
}

/// Returns the workflow context as its result.
struct Echo;

impl Action for Echo {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new(Value::Object(ctx.context)))
    }
}

struct Log;

impl Action for Log {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let keys: Vec<&str> = ctx.context.keys().map(String::as_str).collect();
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            correlation_id = ctx.correlation_id.as_str(),
            keys = ?keys,
            "log action"
        );
        Ok(ActionOutput::new(json!({ "logged_keys": keys.len() })))
    }
}

/// Sleeps for `delay_ms` from the context.
struct Delay;

impl Action for Delay {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let ms = match ctx.get("delay_ms") {
            None => 0,
            Some(value) => value.as_u64().ok_or_else(|| {
                ActionError::new("validation", "delay_ms must be a non-negative integer")
            })?,
        };
        let ms = ms.min(MAX_DELAY_MS);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ActionOutput::new(json!({ "slept_ms": ms })))
    }
}

/// Same as `echo`, but runs on a worker.
struct QueuedEcho;

impl Action for QueuedEcho {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new(Value::Object(ctx.context)))
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::QueuedAsync { queue: None }
    }
}

/// Records the request, then waits for `stepwise signal`. A failure reported
/// with category `rejected` pauses the workflow instead of retrying.
struct Approval;

impl Action for Approval {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::new(json!({ "requested": ctx.action_key }))
            .with_context("approval_requested", true))
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::AwaitsExternalEvent {
            timeout_secs: APPROVAL_TIMEOUT_SECS,
            fallback_action: Some("noop".to_string()),
        }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::default().never_retry_on(["rejected"]))
    }
}

/// Always fails, with the category named by `fail_category`. `validation`
/// failures are never retried.
struct Fail;

impl Action for Fail {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let category = ctx
            .get("fail_category")
            .and_then(Value::as_str)
            .unwrap_or(stepwise_core::action::category::ERROR);
        Err(ActionError::new(category, "fail action invoked"))
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(RetryPolicy::default().never_retry_on(["validation"]))
    }
}
