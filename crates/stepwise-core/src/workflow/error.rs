//! Error taxonomy for the orchestration engine.

use stepwise_types::workflow::{Transition, WorkflowStatus};
use thiserror::Error;
use uuid::Uuid;

use super::checkpoint::CheckpointError;
use super::state_machine::IllegalTransition;
use crate::action::ActionError;
use crate::dispatch::DispatchError;

/// Errors returned to the caller of an orchestrator operation.
///
/// Action failures are normally absorbed into persisted state (a scheduled
/// retry or a paused workflow); only misuse and collaborator failures surface
/// here.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown workflow type '{0}'")]
    UnknownWorkflowType(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("cannot {transition} workflow {workflow_id} in state '{from}'")]
    InvalidTransition {
        workflow_id: Uuid,
        transition: Transition,
        from: WorkflowStatus,
    },

    #[error("action '{action_key}' failed: {error}")]
    ActionExecution {
        action_key: String,
        error: ActionError,
        retryable: bool,
    },

    #[error("action {action_id} timed out waiting for a response")]
    Timeout { action_id: Uuid },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("cannot retry from action index {index}: must be at most {max}")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl OrchestratorError {
    pub fn invalid_transition(workflow_id: Uuid, err: IllegalTransition) -> Self {
        OrchestratorError::InvalidTransition {
            workflow_id,
            transition: err.transition,
            from: err.from,
        }
    }

    /// Whether retrying the same call can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnknownWorkflowType(_)
                | OrchestratorError::UnknownAction(_)
                | OrchestratorError::InvalidTransition { .. }
                | OrchestratorError::WorkflowNotFound(_)
                | OrchestratorError::ActionNotFound(_)
                | OrchestratorError::IndexOutOfRange { .. }
        )
    }
}

/// Errors raised while building the workflow registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow type '{workflow_type}' references unregistered action '{action}'")]
    UnknownAction {
        workflow_type: String,
        action: String,
    },

    #[error("action '{action}' in workflow type '{workflow_type}' falls back to unregistered action '{fallback}'")]
    UnknownFallback {
        workflow_type: String,
        action: String,
        fallback: String,
    },

    #[error("workflow type '{0}' is registered twice")]
    DuplicateType(String),

    #[error("workflow type name must not be empty")]
    EmptyType,
}
