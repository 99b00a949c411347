//! Workflow domain types for Stepwise.
//!
//! A `Workflow` is one durable instance of a `WorkflowDefinition`; its steps
//! are materialized as `WorkflowAction` rows when the workflow starts. This
//! module also holds the lifecycle enums (`WorkflowStatus`, `Transition`), the
//! per-action `ExecutionMode`, and the operator-facing status report.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key/value data accumulated across the steps of a workflow.
pub type Context = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Processing,
    Waiting,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 7] = [
        WorkflowStatus::Created,
        WorkflowStatus::Processing,
        WorkflowStatus::Waiting,
        WorkflowStatus::Paused,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Waiting => "waiting",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    /// `completed` and `cancelled` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown workflow status '{s}'"))
    }
}

/// A named lifecycle transition. Legality is decided by the core's
/// transition table, never by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Wait,
    Resume,
    Pause,
    Complete,
    Fail,
    Retry,
    Cancel,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Wait => "wait",
            Transition::Resume => "resume",
            Transition::Pause => "pause",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Retry => "retry",
            Transition::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// One durable instance of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 workflow ID.
    pub id: Uuid,
    /// Groups related workflows (e.g. all workflows for one order).
    pub correlation_id: String,
    /// Registered workflow type name.
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub context: Context,
    /// Index of the next unprocessed action.
    pub current_action_index: u32,
    /// Who started the workflow (e.g. "user:42", "system").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    /// How it was started (e.g. "manual", "api", "webhook").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional metadata supplied when a workflow is started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Overrides the correlation ID. A string `correlation_id` in the
    /// initiating context still takes precedence.
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
}

/// Timestamps written together with a status transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusStamps {
    pub paused_at: StampChange,
    pub completed_at: StampChange,
    pub failed_at: StampChange,
}

/// What a transition does to one timestamp column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StampChange {
    #[default]
    Keep,
    Set(DateTime<Utc>),
    Clear,
}

impl StampChange {
    pub fn apply(self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            StampChange::Keep => current,
            StampChange::Set(at) => Some(at),
            StampChange::Clear => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// How an action's completion is delivered. Decided once, when the action row
/// is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs on the scheduler's task and completes before it returns.
    #[default]
    Inline,
    /// Handed to the job queue; completion arrives via a callback.
    QueuedAsync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },
    /// Runs inline, then waits for an external signal or the timeout.
    AwaitsExternalEvent {
        timeout_secs: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_action: Option<String>,
    },
}

impl ExecutionMode {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionMode::Inline => "inline",
            ExecutionMode::QueuedAsync { .. } => "queued",
            ExecutionMode::AwaitsExternalEvent { .. } => "awaits_event",
        }
    }

    pub fn is_deferred(&self) -> bool {
        !matches!(self, ExecutionMode::Inline)
    }
}

/// Error payload persisted on a failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    /// Error category used for retry classification.
    pub category: String,
    pub message: String,
    pub retryable: bool,
}

/// One step belonging to exactly one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    /// UUIDv7 action ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Registered action key resolving to executable logic.
    pub action_key: String,
    /// Global execution order, unique within the workflow.
    pub index: u32,
    pub group_index: u32,
    pub is_concurrent: bool,
    pub mode: ExecutionMode,
    /// Snapshot of the initiating context.
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ActionFailure>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowAction {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_terminally_failed(&self) -> bool {
        self.failed_at.is_some() && self.retry_count >= self.max_retries
    }

    /// A deferred action that was dispatched and has not reported back yet.
    pub fn is_in_flight(&self) -> bool {
        self.mode.is_deferred()
            && self.started_at.is_some()
            && self.completed_at.is_none()
            && self.failed_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Status report
// ---------------------------------------------------------------------------

/// Operator-facing summary of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: Uuid,
    pub correlation_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub context: Context,
    /// Key of the action at `current_action_index`, if any remain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
    pub current_action_index: u32,
    pub completed_actions: usize,
    pub total_actions: usize,
    pub actions: Vec<WorkflowAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn action(mode: ExecutionMode) -> WorkflowAction {
        let now = Utc::now();
        WorkflowAction {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            action_key: "noop".to_string(),
            index: 0,
            group_index: 0,
            is_concurrent: false,
            mode,
            context: Context::new(),
            result: None,
            exception: None,
            retry_count: 0,
            max_retries: 3,
            started_at: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_parses_its_own_name() {
        for status in WorkflowStatus::ALL {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("running".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn only_completed_and_cancelled_are_terminal() {
        let terminal: Vec<_> = WorkflowStatus::ALL
            .into_iter()
            .filter(WorkflowStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![WorkflowStatus::Completed, WorkflowStatus::Cancelled]
        );
    }

    #[test]
    fn execution_mode_serializes_with_kind_tag() {
        let mode = ExecutionMode::AwaitsExternalEvent {
            timeout_secs: 30,
            fallback_action: Some("notify".to_string()),
        };
        let json = serde_json::to_value(&mode).unwrap();
        assert_eq!(json["kind"], "awaits_external_event");
        assert_eq!(json["timeout_secs"], 30);

        let inline: ExecutionMode = serde_json::from_str(r#"{"kind":"inline"}"#).unwrap();
        assert_eq!(inline, ExecutionMode::Inline);
    }

    #[test]
    fn inline_action_is_never_in_flight() {
        let mut a = action(ExecutionMode::Inline);
        a.started_at = Some(Utc::now());
        assert!(!a.is_in_flight());
    }

    #[test]
    fn queued_action_in_flight_until_it_reports() {
        let mut a = action(ExecutionMode::QueuedAsync { queue: None });
        assert!(!a.is_in_flight());
        a.started_at = Some(Utc::now());
        assert!(a.is_in_flight());
        a.failed_at = Some(Utc::now());
        assert!(!a.is_in_flight());
    }

    #[test]
    fn terminal_failure_requires_exhausted_retries() {
        let mut a = action(ExecutionMode::Inline);
        a.failed_at = Some(Utc::now());
        a.retry_count = 2;
        assert!(!a.is_terminally_failed());
        a.retry_count = 3;
        assert!(a.is_terminally_failed());
    }

    #[test]
    fn stamp_change_applies() {
        let now = Utc::now();
        assert_eq!(StampChange::Keep.apply(Some(now)), Some(now));
        assert_eq!(StampChange::Clear.apply(Some(now)), None);
        assert_eq!(StampChange::Set(now).apply(None), Some(now));
    }
}
