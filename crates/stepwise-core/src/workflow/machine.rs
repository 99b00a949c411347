//! The workflow machine: advances workflows through their actions.
//!
//! Every entry point (start, advance, resume, cancel, retry, completion and
//! failure reports, delayed callbacks) takes a per-workflow async lock for its
//! whole read-validate-write sequence, and every status change goes through
//! the transition table and a compare-and-set in the store.
//!
//! # Advancement
//!
//! 1. `created` starts, `waiting` resumes once something is runnable, any
//!    other non-`processing` state stops.
//! 2. The earliest incomplete action at or after `current_action_index` is
//!    the lead. No lead means the workflow completes.
//! 3. The lead's incomplete group members run as a concurrent group when
//!    there is more than one and the lead is concurrent; otherwise the lead
//!    runs as a single sequential step.
//! 4. The index moves past a group only once every member has completed.
//!
//! Deferred members that were dispatched and have not reported back are never
//! re-dispatched. If only such members remain, the workflow waits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use stepwise_types::config::{DispatchDriver, OrchestratorConfig};
use stepwise_types::event::WorkflowEvent;
use stepwise_types::workflow::{
    Context, ExecutionMode, StartOptions, Transition, Workflow, WorkflowAction, WorkflowStatus,
    WorkflowStatusReport,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::checkpoint::CheckpointManager;
use super::error::OrchestratorError;
use super::executor::{ActionExecutor, ActionOutcome};
use super::registry::WorkflowRegistry;
use super::retry::RetryResolver;
use super::state_machine;
use crate::action::{ActionError, ActionOutput, ActionRegistry, category};
use crate::dispatch::{ActionJob, Callback, DelayedCallbacks, JobQueue};
use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

/// Whether the advancement loop should look for more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

// ---------------------------------------------------------------------------
// WorkflowMachine
// ---------------------------------------------------------------------------

pub struct WorkflowMachine<R: WorkflowRepository, Q: JobQueue, T: DelayedCallbacks> {
    checkpoint: Arc<CheckpointManager<R>>,
    executor: Arc<ActionExecutor<R, Q, T>>,
    workflows: Arc<WorkflowRegistry>,
    actions: Arc<ActionRegistry>,
    retry: RetryResolver,
    events: EventBus,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<R, Q, T> WorkflowMachine<R, Q, T>
where
    R: WorkflowRepository + 'static,
    Q: JobQueue + 'static,
    T: DelayedCallbacks + 'static,
{
    pub fn new(
        repo: R,
        queue: Q,
        timer: T,
        workflows: WorkflowRegistry,
        actions: Arc<ActionRegistry>,
        config: &OrchestratorConfig,
        events: EventBus,
    ) -> Self {
        let checkpoint = Arc::new(CheckpointManager::new(repo));
        let retry = RetryResolver::new(config.retry.clone());
        let executor = ActionExecutor::new(
            Arc::clone(&checkpoint),
            queue,
            timer,
            Arc::clone(&actions),
            retry.clone(),
            events.clone(),
            config.dispatch.driver == DispatchDriver::Sync,
            config.dispatch.default_queue.clone(),
        );
        Self {
            checkpoint,
            executor: Arc::new(executor),
            workflows: Arc::new(workflows),
            actions,
            retry,
            events,
            locks: DashMap::new(),
        }
    }

    pub fn repo(&self) -> &R {
        self.checkpoint.repo()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Create a workflow of `workflow_type` with all its actions, then run
    /// it as far as it can go without waiting.
    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        context: Context,
        options: StartOptions,
    ) -> Result<Workflow, OrchestratorError> {
        let definition = self
            .workflows
            .get(workflow_type)
            .ok_or_else(|| OrchestratorError::UnknownWorkflowType(workflow_type.to_string()))?;

        let now = Utc::now();
        let correlation_id = context
            .get("correlation_id")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .or(options.correlation_id)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let workflow = Workflow {
            id: Uuid::now_v7(),
            correlation_id,
            workflow_type: workflow_type.to_string(),
            status: WorkflowStatus::Created,
            context: context.clone(),
            current_action_index: 0,
            triggered_by: options.triggered_by,
            trigger_type: options.trigger_type,
            paused_at: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut actions = Vec::new();
        for spec in definition.action_specs() {
            let implementation = self
                .actions
                .resolve(&spec.key)
                .ok_or_else(|| OrchestratorError::UnknownAction(spec.key.clone()))?;
            let policy = self.retry.resolve(implementation.retry_policy());
            actions.push(WorkflowAction {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                action_key: spec.key,
                index: spec.index,
                group_index: spec.group_index,
                is_concurrent: spec.concurrent,
                mode: implementation.mode(),
                context: context.clone(),
                result: None,
                exception: None,
                retry_count: 0,
                max_retries: policy.max_attempts,
                started_at: None,
                completed_at: None,
                failed_at: None,
                created_at: now,
                updated_at: now,
            });
        }

        let id = workflow.id;
        let guard = self.lock(id).await;
        let result = async {
            self.checkpoint.checkpoint_created(&workflow, &actions).await?;
            tracing::info!(
                workflow_id = %id,
                workflow_type,
                correlation_id = workflow.correlation_id.as_str(),
                actions = actions.len(),
                "workflow started"
            );
            self.events.publish(WorkflowEvent::WorkflowStarted {
                workflow_id: id,
                workflow_type: workflow_type.to_string(),
                correlation_id: workflow.correlation_id.clone(),
            });
            self.advance_locked(id).await
        }
        .await;
        self.release(id, guard);
        result
    }

    /// Run the advancement loop for one workflow.
    pub async fn advance(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(id).await;
        let result = self.advance_locked(id).await;
        self.release(id, guard);
        result
    }

    /// Resume a paused workflow. Failure markers on its remaining actions are
    /// cleared so they run again.
    pub async fn resume(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(id).await;
        let result = self.resume_locked(id).await;
        self.release(id, guard);
        result
    }

    /// Cancel a workflow in any non-terminal state. Completed actions are
    /// not rolled back and in-flight work is not interrupted.
    pub async fn cancel(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(id).await;
        let result = self.cancel_locked(id).await;
        self.release(id, guard);
        result
    }

    /// Operator retry of a paused or failed workflow, optionally rewinding
    /// to `from_index` first. Rewinding resets every action at or after the
    /// index.
    pub async fn retry(&self, id: Uuid, from_index: Option<u32>) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(id).await;
        let result = self.retry_locked(id, from_index).await;
        self.release(id, guard);
        result
    }

    /// Report that a deferred action finished. Duplicate reports are ignored.
    pub async fn handle_action_complete(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        output: ActionOutput,
    ) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(workflow_id).await;
        let result = self.complete_locked(workflow_id, action_id, output).await;
        self.release(workflow_id, guard);
        result
    }

    /// Report that a deferred action failed. The retry policy applies.
    pub async fn handle_action_failed(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        error: ActionError,
    ) -> Result<Workflow, OrchestratorError> {
        let guard = self.lock(workflow_id).await;
        let result = self.failed_locked(workflow_id, action_id, error).await;
        self.release(workflow_id, guard);
        result
    }

    /// Deliver an external event to an awaiting action.
    pub async fn signal(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Workflow, OrchestratorError> {
        self.handle_action_complete(workflow_id, action_id, ActionOutput::new(result))
            .await
    }

    /// Worker entry point for a queued action: run its logic, then report
    /// the outcome. The workflow lock is not held while the logic runs.
    pub async fn run_queued_action(&self, job: &ActionJob) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(job.workflow_id).await?;
        let action = self.load_action(job.workflow_id, job.action_id).await?;
        if workflow.status.is_terminal() || !action.is_in_flight() {
            tracing::debug!(
                workflow_id = %workflow.id,
                action_id = %action.id,
                status = workflow.status.as_str(),
                "skipping queued action that is no longer in flight"
            );
            return Ok(workflow);
        }

        match self.executor.invoke(&workflow, &action).await {
            Ok(output) => {
                self.handle_action_complete(job.workflow_id, job.action_id, output)
                    .await
            }
            Err(error) => {
                self.handle_action_failed(job.workflow_id, job.action_id, error)
                    .await
            }
        }
    }

    /// Fire a delayed callback.
    pub async fn handle_callback(&self, callback: &Callback) -> Result<Workflow, OrchestratorError> {
        let id = callback.workflow_id();
        let guard = self.lock(id).await;
        let result = match callback {
            Callback::RetryAction {
                action_id, attempt, ..
            } => self.retry_action_locked(id, *action_id, *attempt).await,
            Callback::WaitTimeout {
                action_id, attempt, ..
            } => self.wait_timeout_locked(id, *action_id, *attempt).await,
        };
        self.release(id, guard);
        result
    }

    /// Operator-facing summary.
    pub async fn status(&self, id: Uuid) -> Result<WorkflowStatusReport, OrchestratorError> {
        let workflow = self.load(id).await?;
        let actions = self.checkpoint.actions(id).await?;
        let current_action = actions
            .iter()
            .find(|a| a.index >= workflow.current_action_index && !a.is_complete())
            .map(|a| a.action_key.clone());

        Ok(WorkflowStatusReport {
            workflow_id: workflow.id,
            correlation_id: workflow.correlation_id,
            workflow_type: workflow.workflow_type,
            status: workflow.status,
            context: workflow.context,
            current_action,
            current_action_index: workflow.current_action_index,
            completed_actions: actions.iter().filter(|a| a.is_complete()).count(),
            total_actions: actions.len(),
            actions,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        })
    }

    pub async fn list(
        &self,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<Workflow>, OrchestratorError> {
        let workflows = self
            .checkpoint
            .repo()
            .list_workflows(status, limit)
            .await
            .map_err(super::checkpoint::CheckpointError::from)?;
        Ok(workflows)
    }

    /// Re-run advancement for `processing` workflows untouched for longer
    /// than `idle_for`, e.g. after a crash interrupted an inline action.
    /// Returns how many were advanced.
    pub async fn recover(&self, idle_for: Duration) -> Result<usize, OrchestratorError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle_for).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<Uuid> = self
            .list(Some(WorkflowStatus::Processing), 1000)
            .await?
            .into_iter()
            .filter(|workflow| workflow.updated_at < cutoff)
            .map(|workflow| workflow.id)
            .collect();

        let mut recovered = 0;
        for id in stale {
            match self.advance(id).await {
                Ok(_) => recovered += 1,
                Err(err) => tracing::warn!(workflow_id = %id, error = %err, "recovery failed"),
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "recovered stalled workflows");
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(self.locks.entry(id).or_default().value());
        mutex.lock_owned().await
    }

    /// Drop the guard and forget the lock if nobody else holds or awaits it.
    fn release(&self, id: Uuid, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks.remove_if(&id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    // -----------------------------------------------------------------------
    // Advancement
    // -----------------------------------------------------------------------

    async fn advance_locked(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        loop {
            let mut workflow = self.load(id).await?;
            match workflow.status {
                WorkflowStatus::Created => {
                    workflow = self.transition(&workflow, Transition::Start).await?;
                }
                WorkflowStatus::Processing | WorkflowStatus::Waiting => {}
                _ => return Ok(workflow),
            }

            let pending = self
                .checkpoint
                .incomplete_from(id, workflow.current_action_index)
                .await?;

            let Some(lead) = pending.first().cloned() else {
                if workflow.status == WorkflowStatus::Waiting {
                    workflow = self.resume_from_wait(&workflow).await?;
                }
                return self.finish(&workflow).await;
            };

            let group: Vec<WorkflowAction> = pending
                .into_iter()
                .filter(|a| a.group_index == lead.group_index)
                .collect();
            let runnable: Vec<WorkflowAction> = group
                .iter()
                .filter(|a| a.failed_at.is_none() && !a.is_in_flight())
                .cloned()
                .collect();

            if runnable.is_empty() {
                if group.iter().any(WorkflowAction::is_in_flight) {
                    self.suspend(id).await?;
                }
                // Otherwise a retry callback is pending for every member.
                return self.load(id).await;
            }

            if workflow.status == WorkflowStatus::Waiting {
                workflow = self.resume_from_wait(&workflow).await?;
            }

            let step = if group.len() > 1 && lead.is_concurrent {
                self.run_group(&workflow, &group, runnable).await?
            } else {
                let action = runnable.into_iter().next().unwrap_or(lead);
                let outcome = self.executor.execute(&workflow, &action).await?;
                self.apply_outcome(id, &action, outcome).await?
            };

            if step == Step::Stop {
                return self.load(id).await;
            }
        }
    }

    /// Run every runnable member of a concurrent group in parallel and decide
    /// once all of them have returned.
    async fn run_group(
        &self,
        workflow: &Workflow,
        group: &[WorkflowAction],
        runnable: Vec<WorkflowAction>,
    ) -> Result<Step, OrchestratorError> {
        let group_index = group.first().map_or(0, |a| a.group_index);
        tracing::debug!(
            workflow_id = %workflow.id,
            group = group_index,
            members = runnable.len(),
            "running concurrent group"
        );

        let mut tasks = JoinSet::new();
        let mut members: HashMap<tokio::task::Id, WorkflowAction> = HashMap::new();
        for action in runnable {
            let executor = Arc::clone(&self.executor);
            let snapshot = workflow.clone();
            let member = action.clone();
            let handle = tasks.spawn(async move { executor.execute(&snapshot, &member).await });
            members.insert(handle.id(), action);
        }

        let mut outcomes: Vec<(WorkflowAction, ActionOutcome)> = Vec::new();
        let mut collaborator_error = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task, Ok(outcome))) => {
                    if let Some(action) = members.remove(&task) {
                        outcomes.push((action, outcome));
                    }
                }
                Ok((_, Err(err))) => {
                    collaborator_error.get_or_insert(err);
                }
                Err(join_err) => {
                    let Some(action) = members.remove(&join_err.id()) else {
                        continue;
                    };
                    let error = ActionError::new(category::PANIC, join_err.to_string());
                    let outcome = self.executor.record_failure(&action, error).await?;
                    outcomes.push((action, outcome));
                }
            }
        }
        if let Some(err) = collaborator_error {
            return Err(err);
        }

        outcomes.sort_by_key(|(action, _)| action.index);
        let mut updates = Context::new();
        let mut dispatched = group.iter().any(WorkflowAction::is_in_flight);
        let mut terminal: Option<(WorkflowAction, ActionError)> = None;
        for (action, outcome) in outcomes {
            match outcome {
                ActionOutcome::Completed { output } => updates.extend(output.context_updates),
                ActionOutcome::AwaitingEvent { context_updates } => {
                    updates.extend(context_updates);
                    dispatched = true;
                }
                ActionOutcome::Queued => dispatched = true,
                ActionOutcome::RetryScheduled { .. } => {}
                ActionOutcome::Failed { error } => {
                    terminal.get_or_insert((action, error));
                }
            }
        }
        self.checkpoint.checkpoint_context(workflow.id, &updates).await?;

        if let Some((action, error)) = terminal {
            self.pause_on_failure(workflow.id, &action, error).await?;
            return Ok(Step::Stop);
        }
        if self.settle_group(workflow.id, group_index).await? {
            return Ok(Step::Continue);
        }
        if dispatched {
            self.suspend(workflow.id).await?;
        }
        Ok(Step::Stop)
    }

    /// Apply the workflow-level effect of one action outcome.
    async fn apply_outcome(
        &self,
        workflow_id: Uuid,
        action: &WorkflowAction,
        outcome: ActionOutcome,
    ) -> Result<Step, OrchestratorError> {
        match outcome {
            ActionOutcome::Completed { output } => {
                self.checkpoint
                    .checkpoint_context(workflow_id, &output.context_updates)
                    .await?;
                self.settle_group(workflow_id, action.group_index).await?;
                Ok(Step::Continue)
            }
            ActionOutcome::AwaitingEvent { context_updates } => {
                self.checkpoint
                    .checkpoint_context(workflow_id, &context_updates)
                    .await?;
                self.suspend(workflow_id).await?;
                Ok(Step::Stop)
            }
            ActionOutcome::Queued => {
                self.suspend(workflow_id).await?;
                Ok(Step::Stop)
            }
            ActionOutcome::RetryScheduled { .. } => Ok(Step::Stop),
            ActionOutcome::Failed { error } => {
                self.pause_on_failure(workflow_id, action, error).await?;
                Ok(Step::Stop)
            }
        }
    }

    /// Move the index past `group_index` if every member has completed.
    async fn settle_group(&self, workflow_id: Uuid, group_index: u32) -> Result<bool, OrchestratorError> {
        let actions = self.checkpoint.actions(workflow_id).await?;
        let members: Vec<&WorkflowAction> = actions
            .iter()
            .filter(|a| a.group_index == group_index)
            .collect();
        if !members.iter().all(|a| a.is_complete()) {
            return Ok(false);
        }
        if let Some(last) = members.iter().map(|a| a.index).max() {
            self.checkpoint.checkpoint_index(workflow_id, last + 1).await?;
        }
        Ok(true)
    }

    async fn finish(&self, workflow: &Workflow) -> Result<Workflow, OrchestratorError> {
        let completed = self.transition(workflow, Transition::Complete).await?;
        let actions_completed = self.checkpoint.actions(workflow.id).await?.len();
        tracing::info!(
            workflow_id = %workflow.id,
            workflow_type = workflow.workflow_type.as_str(),
            actions_completed,
            "workflow completed"
        );
        self.events.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id: workflow.id,
            workflow_type: workflow.workflow_type.clone(),
            actions_completed,
        });
        Ok(completed)
    }

    /// `processing` -> `waiting`. No-op in any other state.
    async fn suspend(&self, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        if workflow.status != WorkflowStatus::Processing {
            return Ok(());
        }
        self.transition(&workflow, Transition::Wait).await?;
        self.events
            .publish(WorkflowEvent::WorkflowWaiting { workflow_id });
        Ok(())
    }

    async fn resume_from_wait(&self, workflow: &Workflow) -> Result<Workflow, OrchestratorError> {
        let resumed = self.transition(workflow, Transition::Resume).await?;
        self.events.publish(WorkflowEvent::WorkflowResumed {
            workflow_id: workflow.id,
        });
        Ok(resumed)
    }

    /// Pause after a terminal action failure, if the current state allows it.
    async fn pause_on_failure(
        &self,
        workflow_id: Uuid,
        action: &WorkflowAction,
        error: ActionError,
    ) -> Result<(), OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        if !state_machine::can_apply(Transition::Pause, workflow.status) {
            return Ok(());
        }
        let reason = OrchestratorError::ActionExecution {
            action_key: action.action_key.clone(),
            retryable: false,
            error,
        }
        .to_string();
        self.transition(&workflow, Transition::Pause).await?;
        tracing::warn!(workflow_id = %workflow_id, reason = reason.as_str(), "workflow paused");
        self.events
            .publish(WorkflowEvent::WorkflowPaused { workflow_id, reason });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Locked operation bodies
    // -----------------------------------------------------------------------

    async fn resume_locked(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(id).await?;
        if workflow.status != WorkflowStatus::Paused {
            return Err(OrchestratorError::InvalidTransition {
                workflow_id: id,
                transition: Transition::Resume,
                from: workflow.status,
            });
        }
        self.clear_failures(id, workflow.current_action_index).await?;
        self.transition(&workflow, Transition::Resume).await?;
        tracing::info!(workflow_id = %id, "workflow resumed");
        self.events
            .publish(WorkflowEvent::WorkflowResumed { workflow_id: id });
        self.advance_locked(id).await
    }

    async fn cancel_locked(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(id).await?;
        let cancelled = self.transition(&workflow, Transition::Cancel).await?;
        tracing::info!(workflow_id = %id, from = workflow.status.as_str(), "workflow cancelled");
        self.events
            .publish(WorkflowEvent::WorkflowCancelled { workflow_id: id });
        Ok(cancelled)
    }

    async fn retry_locked(&self, id: Uuid, from_index: Option<u32>) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(id).await?;
        let transition = match workflow.status {
            WorkflowStatus::Paused => Transition::Resume,
            WorkflowStatus::Failed => Transition::Retry,
            from => {
                return Err(OrchestratorError::InvalidTransition {
                    workflow_id: id,
                    transition: Transition::Retry,
                    from,
                });
            }
        };

        let index = match from_index {
            Some(index) if index > workflow.current_action_index => {
                return Err(OrchestratorError::IndexOutOfRange {
                    index,
                    max: workflow.current_action_index,
                });
            }
            Some(index) => {
                self.checkpoint.reset_actions_from(id, index).await?;
                self.checkpoint.override_index(id, index).await?;
                index
            }
            None => workflow.current_action_index,
        };
        self.clear_failures(id, index).await?;

        self.transition(&workflow, transition).await?;
        tracing::info!(workflow_id = %id, index, "workflow retried");
        self.events
            .publish(WorkflowEvent::WorkflowResumed { workflow_id: id });
        self.advance_locked(id).await
    }

    async fn complete_locked(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        output: ActionOutput,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        let action = self.load_action(workflow_id, action_id).await?;
        if action.is_complete() {
            tracing::info!(
                workflow_id = %workflow_id,
                action_id = %action_id,
                "duplicate completion ignored"
            );
            return Ok(workflow);
        }
        if workflow.status.is_terminal() {
            tracing::warn!(
                workflow_id = %workflow_id,
                action_id = %action_id,
                status = workflow.status.as_str(),
                "rejected completion for finished workflow"
            );
            return Err(OrchestratorError::InvalidTransition {
                workflow_id,
                transition: Transition::Resume,
                from: workflow.status,
            });
        }

        if !self.executor.complete(&action, &output).await? {
            return Ok(workflow);
        }
        self.checkpoint
            .checkpoint_context(workflow_id, &output.context_updates)
            .await?;
        self.settle_group(workflow_id, action.group_index).await?;

        match workflow.status {
            WorkflowStatus::Processing | WorkflowStatus::Waiting => self.advance_locked(workflow_id).await,
            _ => self.load(workflow_id).await,
        }
    }

    async fn failed_locked(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        error: ActionError,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        let action = self.load_action(workflow_id, action_id).await?;
        if action.is_complete() {
            tracing::info!(action_id = %action_id, "failure report for completed action ignored");
            return Ok(workflow);
        }
        if workflow.status.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                workflow_id,
                transition: Transition::Pause,
                from: workflow.status,
            });
        }

        let outcome = self.executor.record_failure(&action, error).await?;
        self.apply_outcome(workflow_id, &action, outcome).await?;
        self.load(workflow_id).await
    }

    async fn retry_action_locked(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        attempt: u32,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        let mut action = self.load_action(workflow_id, action_id).await?;
        if action.is_complete() || action.failed_at.is_none() || action.retry_count != attempt {
            tracing::debug!(action_id = %action_id, attempt, "stale retry callback ignored");
            return Ok(workflow);
        }
        if !matches!(
            workflow.status,
            WorkflowStatus::Processing | WorkflowStatus::Waiting
        ) {
            tracing::debug!(
                workflow_id = %workflow_id,
                status = workflow.status.as_str(),
                "retry skipped for inactive workflow"
            );
            return Ok(workflow);
        }

        self.checkpoint.clear_action_failure(action_id).await?;
        action.failed_at = None;
        action.started_at = None;
        tracing::info!(
            workflow_id = %workflow_id,
            action = action.action_key.as_str(),
            attempt,
            "retrying action"
        );

        let outcome = self.executor.execute(&workflow, &action).await?;
        match self.apply_outcome(workflow_id, &action, outcome).await? {
            Step::Continue => self.advance_locked(workflow_id).await,
            Step::Stop => self.load(workflow_id).await,
        }
    }

    async fn wait_timeout_locked(
        &self,
        workflow_id: Uuid,
        action_id: Uuid,
        attempt: u32,
    ) -> Result<Workflow, OrchestratorError> {
        let workflow = self.load(workflow_id).await?;
        let action = self.load_action(workflow_id, action_id).await?;
        if action.is_complete() || !action.is_in_flight() || action.retry_count != attempt {
            tracing::debug!(action_id = %action_id, "wait timeout no longer relevant");
            return Ok(workflow);
        }
        if !matches!(
            workflow.status,
            WorkflowStatus::Processing | WorkflowStatus::Waiting
        ) {
            return Ok(workflow);
        }
        let ExecutionMode::AwaitsExternalEvent {
            fallback_action, ..
        } = &action.mode
        else {
            return Ok(workflow);
        };

        tracing::warn!(
            workflow_id = %workflow_id,
            action = action.action_key.as_str(),
            "action timed out waiting for a response"
        );

        let outcome = match fallback_action {
            Some(fallback) => match self.executor.invoke_key(fallback, &workflow, &action).await {
                Ok(output) => {
                    tracing::info!(
                        workflow_id = %workflow_id,
                        action = action.action_key.as_str(),
                        fallback = fallback.as_str(),
                        "fallback action substituted"
                    );
                    let output = ActionOutput {
                        result: json!({ "fallback": fallback, "result": output.result }),
                        context_updates: output.context_updates,
                    };
                    self.executor.complete(&action, &output).await?;
                    ActionOutcome::Completed { output }
                }
                Err(error) => self.executor.record_failure(&action, error).await?,
            },
            None => {
                let error = ActionError::new(
                    category::TIMEOUT,
                    OrchestratorError::Timeout { action_id }.to_string(),
                );
                self.executor.record_failure(&action, error).await?
            }
        };

        match self.apply_outcome(workflow_id, &action, outcome).await? {
            Step::Continue => self.advance_locked(workflow_id).await,
            Step::Stop => self.load(workflow_id).await,
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        self.checkpoint
            .workflow(id)
            .await?
            .ok_or(OrchestratorError::WorkflowNotFound(id))
    }

    async fn load_action(&self, workflow_id: Uuid, action_id: Uuid) -> Result<WorkflowAction, OrchestratorError> {
        match self.checkpoint.action(action_id).await? {
            Some(action) if action.workflow_id == workflow_id => Ok(action),
            _ => Err(OrchestratorError::ActionNotFound(action_id)),
        }
    }

    /// Validate `transition`, then compare-and-set it in the store.
    async fn transition(
        &self,
        workflow: &Workflow,
        transition: Transition,
    ) -> Result<Workflow, OrchestratorError> {
        let to = state_machine::validate(transition, workflow.status)
            .map_err(|err| OrchestratorError::invalid_transition(workflow.id, err))?;
        let now = Utc::now();
        let stamps = state_machine::stamps(transition, now);

        let applied = self
            .checkpoint
            .checkpoint_status(workflow.id, workflow.status, to, stamps)
            .await?;
        if !applied {
            let current = self.load(workflow.id).await?;
            return Err(OrchestratorError::InvalidTransition {
                workflow_id: workflow.id,
                transition,
                from: current.status,
            });
        }

        let mut updated = workflow.clone();
        updated.status = to;
        updated.paused_at = stamps.paused_at.apply(updated.paused_at);
        updated.completed_at = stamps.completed_at.apply(updated.completed_at);
        updated.failed_at = stamps.failed_at.apply(updated.failed_at);
        updated.updated_at = now;
        Ok(updated)
    }

    /// Make failed actions at or after `from_index` runnable again. Deferred
    /// ones lose their dispatch stamp and are queued or awaited afresh.
    async fn clear_failures(&self, workflow_id: Uuid, from_index: u32) -> Result<(), OrchestratorError> {
        for action in self.checkpoint.incomplete_from(workflow_id, from_index).await? {
            if action.failed_at.is_some() {
                self.checkpoint.clear_action_failure(action.id).await?;
            }
        }
        Ok(())
    }
}
