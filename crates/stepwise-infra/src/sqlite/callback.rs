//! Durable callback table.
//!
//! `scheduled_callbacks` backs both the job queue (rows due immediately) and
//! the delayed-callback facility (rows due later), so queued work and timers
//! survive a restart. The `Dispatcher` claims due rows, runs them, and deletes
//! them once handled. A claim older than the lease is treated as abandoned and
//! becomes claimable again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepwise_core::dispatch::{ActionJob, Callback, DelayedCallbacks, DispatchError, JobQueue};
use stepwise_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_uuid};

/// Work stored in one callback row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledWork {
    /// Run a queued action on a worker.
    RunAction(ActionJob),
    /// Fire a retry or wait-timeout callback.
    Callback(Callback),
}

/// A row claimed by a dispatcher.
#[derive(Debug, Clone)]
pub struct ClaimedCallback {
    pub id: Uuid,
    pub work: ScheduledWork,
    /// Delivery attempts including this one.
    pub attempts: u32,
}

/// SQLite-backed `JobQueue` and `DelayedCallbacks`.
#[derive(Clone)]
pub struct SqliteCallbackStore {
    pool: DatabasePool,
}

impl SqliteCallbackStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn insert(&self, work: &ScheduledWork, due_at: DateTime<Utc>) -> Result<Uuid, RepositoryError> {
        let id = Uuid::now_v7();
        let (kind, workflow_id, action_id, queue, attempt) = match work {
            ScheduledWork::RunAction(job) => {
                ("run_action", job.workflow_id, job.action_id, job.queue.clone(), 0)
            }
            ScheduledWork::Callback(Callback::RetryAction {
                workflow_id,
                action_id,
                attempt,
            }) => ("retry_action", *workflow_id, *action_id, None, *attempt),
            ScheduledWork::Callback(Callback::WaitTimeout {
                workflow_id,
                action_id,
                attempt,
            }) => ("wait_timeout", *workflow_id, *action_id, None, *attempt),
        };

        sqlx::query(
            r#"INSERT INTO scheduled_callbacks
               (id, kind, workflow_id, action_id, queue, attempt, due_at, attempts, claimed_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)"#,
        )
        .bind(id.to_string())
        .bind(kind)
        .bind(workflow_id.to_string())
        .bind(action_id.to_string())
        .bind(queue)
        .bind(attempt as i64)
        .bind(format_datetime(&due_at))
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(callback_id = %id, kind, workflow_id = %workflow_id, "callback scheduled");
        Ok(id)
    }

    /// Claim up to `limit` rows due at `now`, including rows whose claim is
    /// older than `lease`. Claiming and counting the attempt happen in one
    /// statement.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease: Duration,
    ) -> Result<Vec<ClaimedCallback>, RepositoryError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| RepositoryError::Query(format!("invalid lease: {e}")))?;
        let expired = now
            .checked_sub_signed(lease)
            .ok_or_else(|| RepositoryError::Query("lease out of range".to_string()))?;

        let rows = sqlx::query(
            r#"UPDATE scheduled_callbacks
               SET claimed_at = ?, attempts = attempts + 1
               WHERE id IN (
                   SELECT id FROM scheduled_callbacks
                   WHERE due_at <= ? AND (claimed_at IS NULL OR claimed_at <= ?)
                   ORDER BY due_at ASC
                   LIMIT ?
               )
               RETURNING id, kind, workflow_id, action_id, queue, attempt, due_at, attempts"#,
        )
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .bind(format_datetime(&expired))
        .bind(limit as i64)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            claimed.push(claimed_from_row(row)?);
        }
        // RETURNING order is unspecified.
        claimed.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(claimed.into_iter().map(|(c, _)| c).collect())
    }

    /// Delete a handled row.
    pub async fn complete(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM scheduled_callbacks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    /// Give a claimed row back, due again at `due_at`.
    pub async fn release(&self, id: Uuid, due_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE scheduled_callbacks SET claimed_at = NULL, due_at = ? WHERE id = ?")
            .bind(format_datetime(&due_at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    /// Rows not yet handled, claimed or not.
    pub async fn pending_count(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM scheduled_callbacks")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let n: i64 = row.try_get("n").map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(n as u64)
    }
}

fn claimed_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<(ClaimedCallback, String), RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let id: String = row.try_get("id").map_err(get)?;
    let kind: String = row.try_get("kind").map_err(get)?;
    let workflow_id = parse_uuid(&row.try_get::<String, _>("workflow_id").map_err(get)?)?;
    let action_id = parse_uuid(&row.try_get::<String, _>("action_id").map_err(get)?)?;
    let queue: Option<String> = row.try_get("queue").map_err(get)?;
    let attempt: i64 = row.try_get("attempt").map_err(get)?;
    let due_at: String = row.try_get("due_at").map_err(get)?;
    let attempts: i64 = row.try_get("attempts").map_err(get)?;

    let attempt = attempt as u32;
    let work = match kind.as_str() {
        "run_action" => ScheduledWork::RunAction(ActionJob {
            workflow_id,
            action_id,
            queue,
        }),
        "retry_action" => ScheduledWork::Callback(Callback::RetryAction {
            workflow_id,
            action_id,
            attempt,
        }),
        "wait_timeout" => ScheduledWork::Callback(Callback::WaitTimeout {
            workflow_id,
            action_id,
            attempt,
        }),
        other => {
            return Err(RepositoryError::Query(format!("invalid callback kind: {other}")));
        }
    };

    Ok((
        ClaimedCallback {
            id: parse_uuid(&id)?,
            work,
            attempts: attempts as u32,
        },
        due_at,
    ))
}

fn backend_err(e: RepositoryError) -> DispatchError {
    DispatchError::Backend(e.to_string())
}

impl JobQueue for SqliteCallbackStore {
    async fn enqueue(&self, job: ActionJob) -> Result<(), DispatchError> {
        self.insert(&ScheduledWork::RunAction(job), Utc::now())
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

impl DelayedCallbacks for SqliteCallbackStore {
    async fn schedule_after(&self, delay: Duration, callback: Callback) -> Result<(), DispatchError> {
        let due_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| DispatchError::Backend(format!("delay out of range: {delay:?}")))?;
        self.insert(&ScheduledWork::Callback(callback), due_at)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}
