//! Event types for the Stepwise event bus.
//!
//! `WorkflowEvent` is broadcast on every workflow and action lifecycle change.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle notifications emitted by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: Uuid,
        workflow_type: String,
        correlation_id: String,
    },

    ActionStarted {
        workflow_id: Uuid,
        action_id: Uuid,
        action_key: String,
        index: u32,
    },

    ActionCompleted {
        workflow_id: Uuid,
        action_id: Uuid,
        action_key: String,
        duration_ms: u64,
    },

    ActionFailed {
        workflow_id: Uuid,
        action_id: Uuid,
        action_key: String,
        error: String,
        will_retry: bool,
    },

    /// A retry callback was scheduled for an action.
    ActionRetryScheduled {
        workflow_id: Uuid,
        action_id: Uuid,
        attempt: u32,
        delay_secs: u64,
    },

    /// The workflow suspended on a queued or event-awaiting action.
    WorkflowWaiting { workflow_id: Uuid },

    WorkflowPaused { workflow_id: Uuid, reason: String },

    WorkflowResumed { workflow_id: Uuid },

    WorkflowCompleted {
        workflow_id: Uuid,
        workflow_type: String,
        actions_completed: usize,
    },

    WorkflowCancelled { workflow_id: Uuid },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::ActionStarted { workflow_id, .. }
            | WorkflowEvent::ActionCompleted { workflow_id, .. }
            | WorkflowEvent::ActionFailed { workflow_id, .. }
            | WorkflowEvent::ActionRetryScheduled { workflow_id, .. }
            | WorkflowEvent::WorkflowWaiting { workflow_id }
            | WorkflowEvent::WorkflowPaused { workflow_id, .. }
            | WorkflowEvent::WorkflowResumed { workflow_id }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowCancelled { workflow_id } => *workflow_id,
        }
    }

    /// Returns the action_id from action-scoped variants.
    pub fn action_id(&self) -> Option<Uuid> {
        match self {
            WorkflowEvent::ActionStarted { action_id, .. }
            | WorkflowEvent::ActionCompleted { action_id, .. }
            | WorkflowEvent::ActionFailed { action_id, .. }
            | WorkflowEvent::ActionRetryScheduled { action_id, .. } => Some(*action_id),

            WorkflowEvent::WorkflowStarted { .. }
            | WorkflowEvent::WorkflowWaiting { .. }
            | WorkflowEvent::WorkflowPaused { .. }
            | WorkflowEvent::WorkflowResumed { .. }
            | WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowCancelled { .. } => None,
        }
    }
}
