//! Action executor: runs one action and classifies the outcome.
//!
//! The executor owns everything that happens at the action level: resolving
//! the implementation, stamping start and completion, handing deferred
//! actions to the job queue or the timer, and recording failures with their
//! retry decision. Workflow-level effects (status, index, context) are left
//! to the `WorkflowMachine`, which may run several executions in parallel and
//! decide after the barrier.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepwise_types::event::WorkflowEvent;
use stepwise_types::retry::RetryPolicy;
use stepwise_types::workflow::{ActionFailure, Context, ExecutionMode, Workflow, WorkflowAction};

use super::checkpoint::CheckpointManager;
use super::error::OrchestratorError;
use super::retry::{RetryDecision, RetryResolver};
use crate::action::{ActionContext, ActionError, ActionOutput, ActionRegistry, category};
use crate::dispatch::{ActionJob, Callback, DelayedCallbacks, JobQueue};
use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

/// Classification of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Finished inline; result stored.
    Completed { output: ActionOutput },
    /// Handed to the job queue.
    Queued,
    /// Ran inline and now waits for a signal or its timeout.
    AwaitingEvent { context_updates: Context },
    /// Failed; a retry callback is scheduled.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Failed with no retry left, or not retryable. An action key with no
    /// registered implementation always lands here.
    Failed { error: ActionError },
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

pub struct ActionExecutor<R: WorkflowRepository, Q: JobQueue, T: DelayedCallbacks> {
    checkpoint: Arc<CheckpointManager<R>>,
    queue: Q,
    timer: T,
    actions: Arc<ActionRegistry>,
    retry: RetryResolver,
    events: EventBus,
    /// Run queued actions inline instead of enqueueing them.
    queued_inline: bool,
    default_queue: String,
}

impl<R: WorkflowRepository, Q: JobQueue, T: DelayedCallbacks> ActionExecutor<R, Q, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checkpoint: Arc<CheckpointManager<R>>,
        queue: Q,
        timer: T,
        actions: Arc<ActionRegistry>,
        retry: RetryResolver,
        events: EventBus,
        queued_inline: bool,
        default_queue: String,
    ) -> Self {
        Self {
            checkpoint,
            queue,
            timer,
            actions,
            retry,
            events,
            queued_inline,
            default_queue,
        }
    }

    /// Policy of the implementation registered under `key`, or the default.
    pub fn policy_for(&self, key: &str) -> RetryPolicy {
        self.retry
            .resolve(self.actions.resolve(key).and_then(|action| action.retry_policy()))
    }

    /// Execute `action` according to its persisted execution mode.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        action: &WorkflowAction,
    ) -> Result<ActionOutcome, OrchestratorError> {
        let Some(implementation) = self.actions.resolve(&action.action_key) else {
            let error = ActionError::new(
                category::UNKNOWN_ACTION,
                OrchestratorError::UnknownAction(action.action_key.clone()).to_string(),
            );
            return self.record_failure(action, error).await;
        };

        let mut action = action.clone();
        action.started_at = Some(self.checkpoint.checkpoint_action_started(action.id).await?);
        let action = &action;
        self.events.publish(WorkflowEvent::ActionStarted {
            workflow_id: workflow.id,
            action_id: action.id,
            action_key: action.action_key.clone(),
            index: action.index,
        });

        match &action.mode {
            ExecutionMode::QueuedAsync { queue } if !self.queued_inline => {
                let queue = queue.clone().unwrap_or_else(|| self.default_queue.clone());
                tracing::info!(
                    workflow_id = %workflow.id,
                    action = action.action_key.as_str(),
                    queue = queue.as_str(),
                    "action queued"
                );
                self.queue
                    .enqueue(ActionJob {
                        workflow_id: workflow.id,
                        action_id: action.id,
                        queue: Some(queue),
                    })
                    .await?;
                Ok(ActionOutcome::Queued)
            }
            ExecutionMode::AwaitsExternalEvent { timeout_secs, .. } => {
                match implementation.execute(ActionContext::new(workflow, action)).await {
                    Ok(output) => {
                        self.timer
                            .schedule_after(
                                Duration::from_secs(*timeout_secs),
                                Callback::WaitTimeout {
                                    workflow_id: workflow.id,
                                    action_id: action.id,
                                    attempt: action.retry_count,
                                },
                            )
                            .await?;
                        tracing::info!(
                            workflow_id = %workflow.id,
                            action = action.action_key.as_str(),
                            timeout_secs,
                            "action awaiting external event"
                        );
                        Ok(ActionOutcome::AwaitingEvent {
                            context_updates: output.context_updates,
                        })
                    }
                    Err(error) => self.record_failure(action, error).await,
                }
            }
            _ => match implementation.execute(ActionContext::new(workflow, action)).await {
                Ok(output) => {
                    self.complete(action, &output).await?;
                    Ok(ActionOutcome::Completed { output })
                }
                Err(error) => self.record_failure(action, error).await,
            },
        }
    }

    /// Run the business logic of `action` without touching its state.
    pub async fn invoke(
        &self,
        workflow: &Workflow,
        action: &WorkflowAction,
    ) -> Result<ActionOutput, ActionError> {
        self.invoke_key(&action.action_key, workflow, action).await
    }

    /// Run the logic registered under `key` in the context of `action`.
    pub async fn invoke_key(
        &self,
        key: &str,
        workflow: &Workflow,
        action: &WorkflowAction,
    ) -> Result<ActionOutput, ActionError> {
        let Some(implementation) = self.actions.resolve(key) else {
            return Err(ActionError::new(
                category::UNKNOWN_ACTION,
                OrchestratorError::UnknownAction(key.to_string()).to_string(),
            ));
        };
        implementation.execute(ActionContext::new(workflow, action)).await
    }

    /// Store the result and emit `ActionCompleted`. Returns `false` if the
    /// action had already completed.
    pub async fn complete(
        &self,
        action: &WorkflowAction,
        output: &ActionOutput,
    ) -> Result<bool, OrchestratorError> {
        let stored = self
            .checkpoint
            .checkpoint_action_complete(action.id, &output.result)
            .await?;
        if stored {
            let duration_ms = action
                .started_at
                .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64)
                .unwrap_or(0);
            tracing::info!(
                workflow_id = %action.workflow_id,
                action = action.action_key.as_str(),
                duration_ms,
                "action completed"
            );
            self.events.publish(WorkflowEvent::ActionCompleted {
                workflow_id: action.workflow_id,
                action_id: action.id,
                action_key: action.action_key.clone(),
                duration_ms,
            });
        }
        Ok(stored)
    }

    /// Persist a failure and schedule a retry when the policy allows one.
    pub async fn record_failure(
        &self,
        action: &WorkflowAction,
        error: ActionError,
    ) -> Result<ActionOutcome, OrchestratorError> {
        let unresolved = error.category == category::UNKNOWN_ACTION;
        let policy = self.policy_for(&action.action_key);
        let retryable = !unresolved && RetryResolver::is_retryable(&policy, &error);

        let failure = ActionFailure {
            category: error.category.clone(),
            message: error.message.clone(),
            retryable,
        };
        let retry_count = self
            .checkpoint
            .checkpoint_action_failed(action.id, &failure)
            .await?;

        match RetryResolver::decide(&policy, retryable, retry_count, action.max_retries) {
            RetryDecision::Retry { attempt, delay } => {
                self.timer
                    .schedule_after(
                        delay,
                        Callback::RetryAction {
                            workflow_id: action.workflow_id,
                            action_id: action.id,
                            attempt,
                        },
                    )
                    .await?;
                tracing::warn!(
                    workflow_id = %action.workflow_id,
                    action = action.action_key.as_str(),
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "action failed, retry scheduled"
                );
                self.events.publish(WorkflowEvent::ActionFailed {
                    workflow_id: action.workflow_id,
                    action_id: action.id,
                    action_key: action.action_key.clone(),
                    error: error.to_string(),
                    will_retry: true,
                });
                self.events.publish(WorkflowEvent::ActionRetryScheduled {
                    workflow_id: action.workflow_id,
                    action_id: action.id,
                    attempt,
                    delay_secs: delay.as_secs(),
                });
                Ok(ActionOutcome::RetryScheduled { attempt, delay })
            }
            decision => {
                tracing::error!(
                    workflow_id = %action.workflow_id,
                    action = action.action_key.as_str(),
                    retry_count,
                    exhausted = decision == RetryDecision::Exhausted,
                    error = %error,
                    "action failed"
                );
                self.events.publish(WorkflowEvent::ActionFailed {
                    workflow_id: action.workflow_id,
                    action_id: action.id,
                    action_key: action.action_key.clone(),
                    error: error.to_string(),
                    will_retry: false,
                });
                Ok(ActionOutcome::Failed { error })
            }
        }
    }
}
