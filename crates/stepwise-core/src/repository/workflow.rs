//! Workflow repository trait definition.
//!
//! Defines the durable store for workflows and their actions. The
//! infrastructure layer (stepwise-infra) implements this trait with SQLite
//! persistence; every method is atomic on its own.

use chrono::{DateTime, Utc};
use serde_json::Value;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{
    ActionFailure, Context, StatusStamps, Workflow, WorkflowAction, WorkflowStatus,
};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Insert a workflow together with its full action set, all or nothing.
    fn create_workflow(
        &self,
        workflow: &Workflow,
        actions: &[WorkflowAction],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Most recently created first.
    fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Compare-and-set the status. Returns `false` (and writes nothing) when
    /// the stored status is no longer `from`.
    fn transition_status(
        &self,
        id: &Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        stamps: StatusStamps,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Raise `current_action_index` to `index`. Never lowers it.
    fn advance_index(
        &self,
        id: &Uuid,
        index: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Operator override: set `current_action_index` unconditionally.
    fn set_index(
        &self,
        id: &Uuid,
        index: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Shallow-merge `updates` over the stored context. Returns the result.
    fn merge_context(
        &self,
        id: &Uuid,
        updates: &Context,
    ) -> impl std::future::Future<Output = Result<Context, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// All actions of a workflow, ordered by index.
    fn list_actions(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowAction>, RepositoryError>> + Send;

    fn get_action(
        &self,
        action_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowAction>, RepositoryError>> + Send;

    /// Actions with `index >= from_index` and no `completed_at`, ordered by
    /// index.
    fn incomplete_actions_from(
        &self,
        workflow_id: &Uuid,
        from_index: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowAction>, RepositoryError>> + Send;

    fn mark_action_started(
        &self,
        action_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Store the result and stamp `completed_at`, clearing any failure marker.
    /// Returns `false` when the action was already complete.
    fn complete_action(
        &self,
        action_id: &Uuid,
        result: &Value,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Persist a failure and stamp `failed_at`. When `failure.retryable`,
    /// `retry_count` is incremented in the same write, capped at
    /// `max_retries`. Returns the stored `retry_count`.
    fn record_action_failure(
        &self,
        action_id: &Uuid,
        failure: &ActionFailure,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u32, RepositoryError>> + Send;

    /// Clear `failed_at` and `started_at` so the action is runnable again
    /// and a deferred action is dispatched anew on its next execution.
    fn clear_action_failure(
        &self,
        action_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Return every action with `index >= from_index` to its initial state
    /// (no stamps, no result, no failure, zero retries).
    fn reset_actions_from(
        &self,
        workflow_id: &Uuid,
        from_index: u32,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
