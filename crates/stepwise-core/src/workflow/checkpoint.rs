//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps `WorkflowRepository` with the write operations the orchestrator
//! performs after every state-affecting step. Each checkpoint is a single
//! atomic repository call, so a crash between two checkpoints leaves the
//! workflow resumable from the last one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{
    ActionFailure, Context, StatusStamps, Workflow, WorkflowAction, WorkflowStatus,
};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: R,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn workflow(&self, id: Uuid) -> Result<Option<Workflow>, CheckpointError> {
        Ok(self.repo.get_workflow(&id).await?)
    }

    pub async fn action(&self, action_id: Uuid) -> Result<Option<WorkflowAction>, CheckpointError> {
        Ok(self.repo.get_action(&action_id).await?)
    }

    pub async fn actions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowAction>, CheckpointError> {
        Ok(self.repo.list_actions(&workflow_id).await?)
    }

    pub async fn incomplete_from(
        &self,
        workflow_id: Uuid,
        index: u32,
    ) -> Result<Vec<WorkflowAction>, CheckpointError> {
        Ok(self.repo.incomplete_actions_from(&workflow_id, index).await?)
    }

    // -----------------------------------------------------------------------
    // Workflow-level checkpoints
    // -----------------------------------------------------------------------

    pub async fn checkpoint_created(
        &self,
        workflow: &Workflow,
        actions: &[WorkflowAction],
    ) -> Result<(), CheckpointError> {
        self.repo.create_workflow(workflow, actions).await?;
        tracing::debug!(
            workflow_id = %workflow.id,
            actions = actions.len(),
            "checkpointed workflow creation"
        );
        Ok(())
    }

    /// Returns `false` when another writer changed the status first.
    pub async fn checkpoint_status(
        &self,
        workflow_id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        stamps: StatusStamps,
    ) -> Result<bool, CheckpointError> {
        let applied = self
            .repo
            .transition_status(&workflow_id, from, to, stamps)
            .await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            from = from.as_str(),
            to = to.as_str(),
            applied,
            "checkpointed status"
        );
        Ok(applied)
    }

    pub async fn checkpoint_index(&self, workflow_id: Uuid, index: u32) -> Result<(), CheckpointError> {
        self.repo.advance_index(&workflow_id, index).await?;
        tracing::debug!(workflow_id = %workflow_id, index, "checkpointed index");
        Ok(())
    }

    pub async fn override_index(&self, workflow_id: Uuid, index: u32) -> Result<(), CheckpointError> {
        self.repo.set_index(&workflow_id, index).await?;
        tracing::info!(workflow_id = %workflow_id, index, "overrode action index");
        Ok(())
    }

    /// Merge context updates. An empty update is not written.
    pub async fn checkpoint_context(
        &self,
        workflow_id: Uuid,
        updates: &Context,
    ) -> Result<(), CheckpointError> {
        if updates.is_empty() {
            return Ok(());
        }
        self.repo.merge_context(&workflow_id, updates).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            keys = updates.len(),
            "checkpointed context"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Action-level checkpoints
    // -----------------------------------------------------------------------

    pub async fn checkpoint_action_started(&self, action_id: Uuid) -> Result<DateTime<Utc>, CheckpointError> {
        let at = Utc::now();
        self.repo.mark_action_started(&action_id, at).await?;
        tracing::debug!(action_id = %action_id, "checkpointed action start");
        Ok(at)
    }

    /// Returns `false` when the action had already completed.
    pub async fn checkpoint_action_complete(
        &self,
        action_id: Uuid,
        result: &Value,
    ) -> Result<bool, CheckpointError> {
        let stored = self
            .repo
            .complete_action(&action_id, result, Utc::now())
            .await?;
        tracing::debug!(action_id = %action_id, stored, "checkpointed action complete");
        Ok(stored)
    }

    /// Returns the stored retry count.
    pub async fn checkpoint_action_failed(
        &self,
        action_id: Uuid,
        failure: &ActionFailure,
    ) -> Result<u32, CheckpointError> {
        let retry_count = self
            .repo
            .record_action_failure(&action_id, failure, Utc::now())
            .await?;
        tracing::debug!(
            action_id = %action_id,
            category = failure.category.as_str(),
            retry_count,
            "checkpointed action failure"
        );
        Ok(retry_count)
    }

    pub async fn clear_action_failure(&self, action_id: Uuid) -> Result<(), CheckpointError> {
        self.repo.clear_action_failure(&action_id).await?;
        Ok(())
    }

    pub async fn reset_actions_from(&self, workflow_id: Uuid, index: u32) -> Result<u64, CheckpointError> {
        let reset = self.repo.reset_actions_from(&workflow_id, index).await?;
        tracing::info!(workflow_id = %workflow_id, index, reset, "reset actions");
        Ok(reset)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),
}

impl From<RepositoryError> for CheckpointError {
    fn from(err: RepositoryError) -> Self {
        CheckpointError::Repository(err.to_string())
    }
}
