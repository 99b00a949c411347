//! Polling dispatcher for the durable callback table.
//!
//! Each tick claims a batch of due rows, hands every row to the workflow
//! machine on its own task, and then deletes the rows that were handled.
//! Rows that failed with a transient error are released with a growing delay;
//! rows the machine rejects permanently (unknown workflow, illegal
//! transition) are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepwise_core::repository::workflow::WorkflowRepository;
use stepwise_core::workflow::{OrchestratorError, WorkflowMachine};
use stepwise_types::config::DispatchConfig;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::Workflow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sqlite::callback::{ClaimedCallback, ScheduledWork, SqliteCallbackStore};

/// Longest delay before a failed delivery is tried again.
const MAX_REDELIVERY_DELAY_SECS: i64 = 300;

pub type DurableMachine<R> = WorkflowMachine<R, SqliteCallbackStore, SqliteCallbackStore>;

/// Tally of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub handled: usize,
    pub dropped: usize,
    pub released: usize,
}

impl TickReport {
    pub fn claimed(&self) -> usize {
        self.handled + self.dropped + self.released
    }
}

pub struct Dispatcher<R: WorkflowRepository + 'static> {
    machine: Arc<DurableMachine<R>>,
    store: SqliteCallbackStore,
    config: DispatchConfig,
}

impl<R: WorkflowRepository + 'static> Dispatcher<R> {
    pub fn new(machine: Arc<DurableMachine<R>>, store: SqliteCallbackStore, config: DispatchConfig) -> Self {
        Self {
            machine,
            store,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled. Stalled workflows are recovered
    /// once before the first poll.
    pub async fn run(&self, shutdown: CancellationToken) {
        let lease = Duration::from_secs(self.config.claim_lease_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(10));

        tracing::info!(
            poll_interval_ms = poll.as_millis() as u64,
            batch_size = self.config.batch_size,
            "dispatcher started"
        );
        if let Err(err) = self.machine.recover(lease).await {
            tracing::warn!(error = %err, "startup recovery failed");
        }

        loop {
            match self.tick().await {
                // A full batch means more work may be due right away.
                Ok(report) if report.claimed() >= self.config.batch_size as usize => continue,
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "dispatcher poll failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Claim and handle one batch of due rows.
    pub async fn tick(&self) -> Result<TickReport, RepositoryError> {
        let lease = Duration::from_secs(self.config.claim_lease_secs);
        let claimed = self
            .store
            .claim_due(Utc::now(), self.config.batch_size, lease)
            .await?;
        if claimed.is_empty() {
            return Ok(TickReport::default());
        }
        tracing::debug!(count = claimed.len(), "claimed callbacks");

        let mut tasks = JoinSet::new();
        for callback in claimed {
            let machine = Arc::clone(&self.machine);
            tasks.spawn(async move {
                let result = deliver(&machine, &callback.work).await;
                (callback, result)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (callback, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    // The row keeps its claim and is reclaimed after the lease.
                    tracing::error!(error = %err, "callback task panicked");
                    continue;
                }
            };
            match result {
                Ok(_) => {
                    self.store.complete(callback.id).await?;
                    report.handled += 1;
                }
                Err(err) if err.is_permanent() => {
                    tracing::warn!(
                        callback_id = %callback.id,
                        workflow_id = %workflow_of(&callback),
                        error = %err,
                        "dropping callback rejected by the orchestrator"
                    );
                    self.store.complete(callback.id).await?;
                    report.dropped += 1;
                }
                Err(err) => {
                    let delay = redelivery_delay(&callback);
                    tracing::error!(
                        callback_id = %callback.id,
                        workflow_id = %workflow_of(&callback),
                        attempts = callback.attempts,
                        retry_in_secs = delay.num_seconds(),
                        error = %err,
                        "callback delivery failed"
                    );
                    self.store.release(callback.id, Utc::now() + delay).await?;
                    report.released += 1;
                }
            }
        }

        Ok(report)
    }
}

async fn deliver<R: WorkflowRepository + 'static>(
    machine: &DurableMachine<R>,
    work: &ScheduledWork,
) -> Result<Workflow, OrchestratorError> {
    match work {
        ScheduledWork::RunAction(job) => machine.run_queued_action(job).await,
        ScheduledWork::Callback(callback) => machine.handle_callback(callback).await,
    }
}

fn redelivery_delay(callback: &ClaimedCallback) -> chrono::Duration {
    let secs = 5i64.saturating_mul(callback.attempts.max(1) as i64);
    chrono::Duration::seconds(secs.min(MAX_REDELIVERY_DELAY_SECS))
}

fn workflow_of(callback: &ClaimedCallback) -> Uuid {
    match &callback.work {
        ScheduledWork::RunAction(job) => job.workflow_id,
        ScheduledWork::Callback(callback) => callback.workflow_id(),
    }
}
