//! Asynchronous hand-off ports.
//!
//! `JobQueue` carries queued actions to an external worker. `DelayedCallbacks`
//! fires retry and wait-timeout callbacks later. Both are implemented by the
//! infrastructure layer (stepwise-infra) and must be durable across restarts.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A queued action. Carries identifiers only; the worker reloads state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionJob {
    pub workflow_id: Uuid,
    pub action_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

/// Work the orchestrator asks to be done after a delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Callback {
    /// Re-execute an action whose retryable failure was recorded as
    /// `attempt`.
    RetryAction {
        workflow_id: Uuid,
        action_id: Uuid,
        attempt: u32,
    },
    /// Check whether an event-awaiting action was signalled. `attempt` is the
    /// action's retry count when the wait began.
    WaitTimeout {
        workflow_id: Uuid,
        action_id: Uuid,
        attempt: u32,
    },
}

impl Callback {
    pub fn workflow_id(&self) -> Uuid {
        match self {
            Callback::RetryAction { workflow_id, .. } | Callback::WaitTimeout { workflow_id, .. } => {
                *workflow_id
            }
        }
    }

    pub fn action_id(&self) -> Uuid {
        match self {
            Callback::RetryAction { action_id, .. } | Callback::WaitTimeout { action_id, .. } => {
                *action_id
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch backend error: {0}")]
    Backend(String),
}

/// Hands queued actions to an external worker.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: ActionJob) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Schedules a callback to fire after `delay`.
pub trait DelayedCallbacks: Send + Sync {
    fn schedule_after(
        &self,
        delay: Duration,
        callback: Callback,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}
