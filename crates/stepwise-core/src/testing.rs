//! In-memory collaborators for orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stepwise_types::config::OrchestratorConfig;
use stepwise_types::definition::WorkflowDefinition;
use stepwise_types::error::RepositoryError;
use stepwise_types::retry::RetryPolicy;
use stepwise_types::workflow::{
    ActionFailure, Context, ExecutionMode, StatusStamps, Workflow, WorkflowAction, WorkflowStatus,
};
use uuid::Uuid;

use crate::action::{Action, ActionContext, ActionError, ActionOutput, ActionRegistry};
use crate::dispatch::{ActionJob, Callback, DelayedCallbacks, DispatchError, JobQueue};
use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;
use crate::workflow::{WorkflowMachine, WorkflowRegistry};

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, Workflow>,
    actions: HashMap<Uuid, WorkflowAction>,
}

/// Shares its state between clones.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<State>>,
}

impl MemoryRepository {
    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn workflow_mut<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut Workflow) -> T,
    ) -> Result<T, RepositoryError> {
        self.with_state(|state| {
            let workflow = state.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
            let out = f(workflow);
            workflow.updated_at = Utc::now();
            Ok(out)
        })
    }

    fn action_mut<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut WorkflowAction) -> T,
    ) -> Result<T, RepositoryError> {
        self.with_state(|state| {
            let action = state.actions.get_mut(id).ok_or(RepositoryError::NotFound)?;
            let out = f(action);
            action.updated_at = Utc::now();
            Ok(out)
        })
    }

    fn sorted_actions(&self, workflow_id: &Uuid) -> Vec<WorkflowAction> {
        self.with_state(|state| {
            let mut actions: Vec<WorkflowAction> = state
                .actions
                .values()
                .filter(|a| a.workflow_id == *workflow_id)
                .cloned()
                .collect();
            actions.sort_by_key(|a| a.index);
            actions
        })
    }

    /// Backdate `updated_at`, as if the workflow had stalled.
    pub fn age_workflow(&self, id: &Uuid, by: chrono::Duration) {
        self.with_state(|state| {
            if let Some(workflow) = state.workflows.get_mut(id) {
                workflow.updated_at -= by;
            }
        });
    }
}

impl WorkflowRepository for MemoryRepository {
    async fn create_workflow(
        &self,
        workflow: &Workflow,
        actions: &[WorkflowAction],
    ) -> Result<(), RepositoryError> {
        self.with_state(|state| {
            if state.workflows.contains_key(&workflow.id) {
                return Err(RepositoryError::Conflict(workflow.id.to_string()));
            }
            state.workflows.insert(workflow.id, workflow.clone());
            for action in actions {
                state.actions.insert(action.id, action.clone());
            }
            Ok(())
        })
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.with_state(|state| state.workflows.get(id).cloned()))
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let mut workflows: Vec<Workflow> = self.with_state(|state| {
            state
                .workflows
                .values()
                .filter(|w| status.is_none_or(|s| w.status == s))
                .cloned()
                .collect()
        });
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        workflows.truncate(limit as usize);
        Ok(workflows)
    }

    async fn transition_status(
        &self,
        id: &Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        stamps: StatusStamps,
    ) -> Result<bool, RepositoryError> {
        self.with_state(|state| {
            let workflow = state.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
            if workflow.status != from {
                return Ok(false);
            }
            workflow.status = to;
            workflow.paused_at = stamps.paused_at.apply(workflow.paused_at);
            workflow.completed_at = stamps.completed_at.apply(workflow.completed_at);
            workflow.failed_at = stamps.failed_at.apply(workflow.failed_at);
            workflow.updated_at = Utc::now();
            Ok(true)
        })
    }

    async fn advance_index(&self, id: &Uuid, index: u32) -> Result<(), RepositoryError> {
        self.workflow_mut(id, |w| w.current_action_index = w.current_action_index.max(index))
    }

    async fn set_index(&self, id: &Uuid, index: u32) -> Result<(), RepositoryError> {
        self.workflow_mut(id, |w| w.current_action_index = index)
    }

    async fn merge_context(&self, id: &Uuid, updates: &Context) -> Result<Context, RepositoryError> {
        self.workflow_mut(id, |w| {
            for (key, value) in updates {
                w.context.insert(key.clone(), value.clone());
            }
            w.context.clone()
        })
    }

    async fn list_actions(&self, workflow_id: &Uuid) -> Result<Vec<WorkflowAction>, RepositoryError> {
        Ok(self.sorted_actions(workflow_id))
    }

    async fn get_action(&self, action_id: &Uuid) -> Result<Option<WorkflowAction>, RepositoryError> {
        Ok(self.with_state(|state| state.actions.get(action_id).cloned()))
    }

    async fn incomplete_actions_from(
        &self,
        workflow_id: &Uuid,
        from_index: u32,
    ) -> Result<Vec<WorkflowAction>, RepositoryError> {
        Ok(self
            .sorted_actions(workflow_id)
            .into_iter()
            .filter(|a| a.index >= from_index && !a.is_complete())
            .collect())
    }

    async fn mark_action_started(&self, action_id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.action_mut(action_id, |a| a.started_at = Some(at))
    }

    async fn complete_action(
        &self,
        action_id: &Uuid,
        result: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.action_mut(action_id, |a| {
            if a.completed_at.is_some() {
                return false;
            }
            a.result = Some(result.clone());
            a.completed_at = Some(at);
            a.failed_at = None;
            true
        })
    }

    async fn record_action_failure(
        &self,
        action_id: &Uuid,
        failure: &ActionFailure,
        at: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        self.action_mut(action_id, |a| {
            if failure.retryable {
                a.retry_count = (a.retry_count + 1).min(a.max_retries);
            }
            a.exception = Some(failure.clone());
            a.failed_at = Some(at);
            a.retry_count
        })
    }

    async fn clear_action_failure(&self, action_id: &Uuid) -> Result<(), RepositoryError> {
        self.action_mut(action_id, |a| {
            a.failed_at = None;
            a.started_at = None;
        })
    }

    async fn reset_actions_from(&self, workflow_id: &Uuid, from_index: u32) -> Result<u64, RepositoryError> {
        Ok(self.with_state(|state| {
            let mut reset = 0;
            for action in state.actions.values_mut() {
                if action.workflow_id == *workflow_id && action.index >= from_index {
                    action.result = None;
                    action.exception = None;
                    action.retry_count = 0;
                    action.started_at = None;
                    action.completed_at = None;
                    action.failed_at = None;
                    action.updated_at = Utc::now();
                    reset += 1;
                }
            }
            reset
        }))
    }
}

// ---------------------------------------------------------------------------
// Recording dispatch doubles
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingQueue {
    jobs: Arc<Mutex<Vec<ActionJob>>>,
}

impl RecordingQueue {
    pub fn take(&self) -> Vec<ActionJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: ActionJob) -> Result<(), DispatchError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingTimer {
    scheduled: Arc<Mutex<Vec<(Duration, Callback)>>>,
}

impl RecordingTimer {
    pub fn take(&self) -> Vec<(Duration, Callback)> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }
}

impl DelayedCallbacks for RecordingTimer {
    async fn schedule_after(&self, delay: Duration, callback: Callback) -> Result<(), DispatchError> {
        self.scheduled.lock().unwrap().push((delay, callback));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted action
// ---------------------------------------------------------------------------

/// Test action whose behavior is configured up front. Clones share their
/// counters, so the factory closure can hand out clones.
#[derive(Clone)]
pub struct Scripted {
    output: ActionOutput,
    error: ActionError,
    failures_left: Arc<AtomicU32>,
    panics: bool,
    mode: ExecutionMode,
    policy: Option<RetryPolicy>,
    calls: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<Context>>>,
}

impl Scripted {
    pub fn ok(result: Value) -> Self {
        Self {
            output: ActionOutput::new(result),
            error: ActionError::other("scripted failure"),
            failures_left: Arc::new(AtomicU32::new(0)),
            panics: false,
            mode: ExecutionMode::Inline,
            policy: None,
            calls: Arc::new(AtomicU32::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always fails with `category`.
    pub fn failing(category: &str) -> Self {
        Self::ok(Value::Null).fail_times(u32::MAX, category)
    }

    pub fn fail_times(mut self, times: u32, category: &str) -> Self {
        self.failures_left = Arc::new(AtomicU32::new(times));
        self.error = ActionError::new(category, format!("{category} from scripted action"));
        self
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::ok(Value::Null)
        }
    }

    pub fn sets(mut self, key: &str, value: Value) -> Self {
        self.output = self.output.with_context(key, value);
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Factory for `ActionRegistry::register` sharing this instance's state.
    pub fn factory(&self) -> impl Fn() -> Scripted + Send + Sync + 'static {
        let action = self.clone();
        move || action.clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Workflow contexts observed by each call.
    pub fn seen(&self) -> Vec<Context> {
        self.seen.lock().unwrap().clone()
    }
}

impl Action for Scripted {
    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(ctx.context.clone());
        if self.panics {
            panic!("scripted panic");
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        Ok(self.output.clone())
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.policy.clone()
    }

    fn mode(&self) -> ExecutionMode {
        self.mode.clone()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestMachine = WorkflowMachine<MemoryRepository, RecordingQueue, RecordingTimer>;

pub struct Harness {
    pub machine: TestMachine,
    pub repo: MemoryRepository,
    pub queue: RecordingQueue,
    pub timer: RecordingTimer,
    pub events: EventBus,
}

impl Harness {
    pub fn new(
        actions: ActionRegistry,
        definitions: Vec<WorkflowDefinition>,
        config: OrchestratorConfig,
    ) -> Self {
        let actions = Arc::new(actions);
        let workflows = WorkflowRegistry::build(definitions, &actions).unwrap();
        let repo = MemoryRepository::default();
        let queue = RecordingQueue::default();
        let timer = RecordingTimer::default();
        let events = EventBus::new(256);
        let machine = WorkflowMachine::new(
            repo.clone(),
            queue.clone(),
            timer.clone(),
            workflows,
            actions,
            &config,
            events.clone(),
        );
        Self {
            machine,
            repo,
            queue,
            timer,
            events,
        }
    }

    pub async fn actions(&self, workflow_id: Uuid) -> Vec<WorkflowAction> {
        self.repo.list_actions(&workflow_id).await.unwrap()
    }

    pub async fn action(&self, workflow_id: Uuid, key: &str) -> WorkflowAction {
        self.actions(workflow_id)
            .await
            .into_iter()
            .find(|a| a.action_key == key)
            .unwrap()
    }
}

pub fn context(value: Value) -> Context {
    match value {
        Value::Object(map) => map,
        _ => Context::new(),
    }
}

pub fn empty() -> Context {
    context(json!({}))
}
