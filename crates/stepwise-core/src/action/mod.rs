//! Action trait and supporting types.
//!
//! An action is one unit of business logic. The orchestrator never calls an
//! implementation directly: it resolves a `BoxAction` from the
//! `ActionRegistry` by key and invokes it with an `ActionContext`.

pub mod box_action;
pub mod registry;

use std::future::Future;

use serde_json::Value;
use stepwise_types::retry::RetryPolicy;
use stepwise_types::workflow::{Context, ExecutionMode, Workflow, WorkflowAction};
use thiserror::Error;
use uuid::Uuid;

pub use box_action::BoxAction;
pub use registry::ActionRegistry;

/// Well-known error categories produced by the orchestrator itself.
pub mod category {
    /// The action key is not registered.
    pub const UNKNOWN_ACTION: &str = "unknown_action";
    /// An event-awaiting action saw no signal before its timeout.
    pub const TIMEOUT: &str = "timeout";
    /// The action task panicked.
    pub const PANIC: &str = "panic";
    /// Default category for errors that do not name one.
    pub const ERROR: &str = "error";
}

/// Business logic for one workflow step.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// See [`BoxAction`] for dynamic dispatch.
pub trait Action: Send + Sync {
    fn execute(
        &self,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<ActionOutput, ActionError>> + Send;

    /// Retry policy declared by the implementation. `None` inherits the
    /// process-wide default.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }
}

/// Everything an action can see about the step it is executing.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workflow_id: Uuid,
    pub workflow_type: String,
    pub correlation_id: String,
    pub action_id: Uuid,
    pub action_key: String,
    /// 1-based execution attempt.
    pub attempt: u32,
    /// Workflow context as of the start of this step.
    pub context: Context,
    /// Snapshot of the initiating context taken at workflow start.
    pub snapshot: Context,
}

impl ActionContext {
    pub fn new(workflow: &Workflow, action: &WorkflowAction) -> Self {
        Self {
            workflow_id: workflow.id,
            workflow_type: workflow.workflow_type.clone(),
            correlation_id: workflow.correlation_id.clone(),
            action_id: action.id,
            action_key: action.action_key.clone(),
            attempt: action.retry_count + 1,
            context: workflow.context.clone(),
            snapshot: action.context.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }
}

/// Successful result of an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    /// Stored on the action row.
    pub result: Value,
    /// Shallow-merged into the workflow context.
    pub context_updates: Context,
}

impl ActionOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            context_updates: Context::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }
}

/// Failure reported by an action, tagged with a category for retry
/// classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct ActionError {
    pub category: String,
    pub message: String,
}

impl ActionError {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(category::ERROR, message)
    }

    pub fn timed_out() -> Self {
        Self::new(category::TIMEOUT, "Action timed out")
    }
}
