//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stepwise-core` using sqlx with split
//! read/write pools. Contexts, results, exceptions and execution modes are
//! stored as JSON text; statuses as their snake_case names.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use stepwise_core::repository::workflow::WorkflowRepository;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{
    ActionFailure, Context, ExecutionMode, StampChange, StatusStamps, Workflow, WorkflowAction,
    WorkflowStatus,
};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Number of workflows in each status. Statuses with none are omitted.
    pub async fn status_counts(&self) -> Result<Vec<(WorkflowStatus, u64)>, RepositoryError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM workflows GROUP BY status ORDER BY status")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(query_err)?;
                let n: i64 = row.try_get("n").map_err(query_err)?;
                let status = status
                    .parse::<WorkflowStatus>()
                    .map_err(RepositoryError::Query)?;
                Ok((status, n as u64))
            })
            .collect()
    }

    async fn action_exists(&self, action_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_actions WHERE id = ?")
            .bind(action_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    correlation_id: String,
    workflow_type: String,
    status: String,
    context: String,
    current_action_index: i64,
    triggered_by: Option<String>,
    trigger_type: Option<String>,
    paused_at: Option<String>,
    completed_at: Option<String>,
    failed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            workflow_type: row.try_get("workflow_type")?,
            status: row.try_get("status")?,
            context: row.try_get("context")?,
            current_action_index: row.try_get("current_action_index")?,
            triggered_by: row.try_get("triggered_by")?,
            trigger_type: row.try_get("trigger_type")?,
            paused_at: row.try_get("paused_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        let status: WorkflowStatus = self
            .status
            .parse()
            .map_err(|_| RepositoryError::Query(format!("invalid workflow status: {}", self.status)))?;

        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            correlation_id: self.correlation_id,
            workflow_type: self.workflow_type,
            status,
            context: parse_context(&self.context)?,
            current_action_index: self.current_action_index as u32,
            triggered_by: self.triggered_by,
            trigger_type: self.trigger_type,
            paused_at: parse_optional_datetime(self.paused_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
            failed_at: parse_optional_datetime(self.failed_at.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ActionRow {
    id: String,
    workflow_id: String,
    action_key: String,
    action_index: i64,
    group_index: i64,
    is_concurrent: bool,
    mode: String,
    context: String,
    result: Option<String>,
    exception: Option<String>,
    retry_count: i64,
    max_retries: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
    failed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ActionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            action_key: row.try_get("action_key")?,
            action_index: row.try_get("action_index")?,
            group_index: row.try_get("group_index")?,
            is_concurrent: row.try_get("is_concurrent")?,
            mode: row.try_get("mode")?,
            context: row.try_get("context")?,
            result: row.try_get("result")?,
            exception: row.try_get("exception")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_action(self) -> Result<WorkflowAction, RepositoryError> {
        let mode: ExecutionMode = serde_json::from_str(&self.mode)
            .map_err(|e| RepositoryError::Query(format!("invalid execution mode JSON: {e}")))?;
        let result = self
            .result
            .as_deref()
            .map(|s| {
                serde_json::from_str::<Value>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid result JSON: {e}")))
            })
            .transpose()?;
        let exception = self
            .exception
            .as_deref()
            .map(|s| {
                serde_json::from_str::<ActionFailure>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid exception JSON: {e}")))
            })
            .transpose()?;

        Ok(WorkflowAction {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            action_key: self.action_key,
            index: self.action_index as u32,
            group_index: self.group_index as u32,
            is_concurrent: self.is_concurrent,
            mode,
            context: parse_context(&self.context)?,
            result,
            exception,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            started_at: parse_optional_datetime(self.started_at.as_deref())?,
            completed_at: parse_optional_datetime(self.completed_at.as_deref())?,
            failed_at: parse_optional_datetime(self.failed_at.as_deref())?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn parse_context(s: &str) -> Result<Context, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid context JSON: {e}")))
}

fn parse_optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.map(parse_datetime).transpose()
}

/// `(keep, value)` bind pair for a `CASE WHEN ? THEN column ELSE ? END` update.
fn stamp_binds(change: StampChange) -> (bool, Option<String>) {
    match change {
        StampChange::Keep => (true, None),
        StampChange::Set(at) => (false, Some(format_datetime(&at))),
        StampChange::Clear => (false, None),
    }
}

const WORKFLOW_COLUMNS: &str = "id, correlation_id, workflow_type, status, context, \
     current_action_index, triggered_by, trigger_type, paused_at, completed_at, failed_at, \
     created_at, updated_at";

const ACTION_COLUMNS: &str = "id, workflow_id, action_key, action_index, group_index, \
     is_concurrent, mode, context, result, exception, retry_count, max_retries, started_at, \
     completed_at, failed_at, created_at, updated_at";

fn map_workflows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Workflow>, RepositoryError> {
    rows.iter()
        .map(|row| WorkflowRow::from_row(row).map_err(query_err)?.into_workflow())
        .collect()
}

fn map_actions(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowAction>, RepositoryError> {
    rows.iter()
        .map(|row| ActionRow::from_row(row).map_err(query_err)?.into_action())
        .collect()
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_workflow(
        &self,
        workflow: &Workflow,
        actions: &[WorkflowAction],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, correlation_id, workflow_type, status, context, current_action_index,
                triggered_by, trigger_type, paused_at, completed_at, failed_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.correlation_id)
        .bind(&workflow.workflow_type)
        .bind(workflow.status.as_str())
        .bind(to_json(&workflow.context)?)
        .bind(workflow.current_action_index as i64)
        .bind(&workflow.triggered_by)
        .bind(&workflow.trigger_type)
        .bind(workflow.paused_at.as_ref().map(format_datetime))
        .bind(workflow.completed_at.as_ref().map(format_datetime))
        .bind(workflow.failed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!("workflow {} already exists", workflow.id));
                }
            }
            query_err(e)
        })?;

        for action in actions {
            sqlx::query(
                r#"INSERT INTO workflow_actions
                   (id, workflow_id, action_key, action_index, group_index, is_concurrent, mode,
                    context, result, exception, retry_count, max_retries, started_at,
                    completed_at, failed_at, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(action.id.to_string())
            .bind(action.workflow_id.to_string())
            .bind(&action.action_key)
            .bind(action.index as i64)
            .bind(action.group_index as i64)
            .bind(action.is_concurrent)
            .bind(to_json(&action.mode)?)
            .bind(to_json(&action.context)?)
            .bind(action.result.as_ref().map(to_json).transpose()?)
            .bind(action.exception.as_ref().map(to_json).transpose()?)
            .bind(action.retry_count as i64)
            .bind(action.max_retries as i64)
            .bind(action.started_at.as_ref().map(format_datetime))
            .bind(action.completed_at.as_ref().map(format_datetime))
            .bind(action.failed_at.as_ref().map(format_datetime))
            .bind(format_datetime(&action.created_at))
            .bind(format_datetime(&action.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(WorkflowRow::from_row(&row).map_err(query_err)?.into_workflow()?)),
            None => Ok(None),
        }
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: u32,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE status = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        map_workflows(&rows)
    }

    async fn transition_status(
        &self,
        id: &Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        stamps: StatusStamps,
    ) -> Result<bool, RepositoryError> {
        let (keep_paused, paused_at) = stamp_binds(stamps.paused_at);
        let (keep_completed, completed_at) = stamp_binds(stamps.completed_at);
        let (keep_failed, failed_at) = stamp_binds(stamps.failed_at);

        let result = sqlx::query(
            r#"UPDATE workflows SET
                 status = ?,
                 paused_at = CASE WHEN ? THEN paused_at ELSE ? END,
                 completed_at = CASE WHEN ? THEN completed_at ELSE ? END,
                 failed_at = CASE WHEN ? THEN failed_at ELSE ? END,
                 updated_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(to.as_str())
        .bind(keep_paused)
        .bind(paused_at)
        .bind(keep_completed)
        .bind(completed_at)
        .bind(keep_failed)
        .bind(failed_at)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn advance_index(&self, id: &Uuid, index: u32) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE workflows SET current_action_index = MAX(current_action_index, ?), updated_at = ? WHERE id = ?",
        )
        .bind(index as i64)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn set_index(&self, id: &Uuid, index: u32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET current_action_index = ?, updated_at = ? WHERE id = ?")
            .bind(index as i64)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn merge_context(&self, id: &Uuid, updates: &Context) -> Result<Context, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query("SELECT context FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .ok_or(RepositoryError::NotFound)?;
        let stored: String = row.try_get("context").map_err(query_err)?;

        let mut context = parse_context(&stored)?;
        for (key, value) in updates {
            context.insert(key.clone(), value.clone());
        }

        sqlx::query("UPDATE workflows SET context = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(&context)?)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(context)
    }

    async fn list_actions(&self, workflow_id: &Uuid) -> Result<Vec<WorkflowAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM workflow_actions WHERE workflow_id = ? ORDER BY action_index ASC"
        ))
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        map_actions(&rows)
    }

    async fn get_action(&self, action_id: &Uuid) -> Result<Option<WorkflowAction>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ACTION_COLUMNS} FROM workflow_actions WHERE id = ?"))
            .bind(action_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(ActionRow::from_row(&row).map_err(query_err)?.into_action()?)),
            None => Ok(None),
        }
    }

    async fn incomplete_actions_from(
        &self,
        workflow_id: &Uuid,
        from_index: u32,
    ) -> Result<Vec<WorkflowAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM workflow_actions \
             WHERE workflow_id = ? AND action_index >= ? AND completed_at IS NULL \
             ORDER BY action_index ASC"
        ))
        .bind(workflow_id.to_string())
        .bind(from_index as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        map_actions(&rows)
    }

    async fn mark_action_started(&self, action_id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflow_actions SET started_at = ?, updated_at = ? WHERE id = ?")
            .bind(format_datetime(&at))
            .bind(format_datetime(&Utc::now()))
            .bind(action_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn complete_action(
        &self,
        action_id: &Uuid,
        result: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            r#"UPDATE workflow_actions
               SET result = ?, completed_at = ?, failed_at = NULL, updated_at = ?
               WHERE id = ? AND completed_at IS NULL"#,
        )
        .bind(to_json(result)?)
        .bind(format_datetime(&at))
        .bind(format_datetime(&Utc::now()))
        .bind(action_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.action_exists(action_id).await? {
            return Err(RepositoryError::NotFound);
        }
        Ok(false)
    }

    async fn record_action_failure(
        &self,
        action_id: &Uuid,
        failure: &ActionFailure,
        at: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        // Increment and read back in one statement.
        let row = sqlx::query(
            r#"UPDATE workflow_actions SET
                 exception = ?,
                 failed_at = ?,
                 retry_count = CASE WHEN ? THEN MIN(retry_count + 1, max_retries) ELSE retry_count END,
                 updated_at = ?
               WHERE id = ?
               RETURNING retry_count"#,
        )
        .bind(to_json(failure)?)
        .bind(format_datetime(&at))
        .bind(failure.retryable)
        .bind(format_datetime(&Utc::now()))
        .bind(action_id.to_string())
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?
        .ok_or(RepositoryError::NotFound)?;

        let retry_count: i64 = row.try_get("retry_count").map_err(query_err)?;
        Ok(retry_count as u32)
    }

    async fn clear_action_failure(&self, action_id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE workflow_actions SET failed_at = NULL, started_at = NULL, updated_at = ? WHERE id = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(action_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn reset_actions_from(&self, workflow_id: &Uuid, from_index: u32) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_actions SET
                 result = NULL, exception = NULL, retry_count = 0,
                 started_at = NULL, completed_at = NULL, failed_at = NULL, updated_at = ?
               WHERE workflow_id = ? AND action_index >= ?"#,
        )
        .bind(format_datetime(&Utc::now()))
        .bind(workflow_id.to_string())
        .bind(from_index as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use serde_json::json;
    use stepwise_types::workflow::StatusStamps;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_workflow() -> Workflow {
        let now = Utc::now();
        let mut context = Context::new();
        context.insert("order_id".to_string(), json!(7));
        Workflow {
            id: Uuid::now_v7(),
            correlation_id: "order-7".to_string(),
            workflow_type: "order".to_string(),
            status: WorkflowStatus::Created,
            context,
            current_action_index: 0,
            triggered_by: Some("user:1".to_string()),
            trigger_type: Some("manual".to_string()),
            paused_at: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_action(workflow: &Workflow, key: &str, index: u32, group_index: u32) -> WorkflowAction {
        let now = Utc::now();
        WorkflowAction {
            id: Uuid::now_v7(),
            workflow_id: workflow.id,
            action_key: key.to_string(),
            index,
            group_index,
            is_concurrent: false,
            mode: ExecutionMode::Inline,
            context: workflow.context.clone(),
            result: None,
            exception: None,
            retry_count: 0,
            max_retries: 2,
            started_at: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seeded() -> (SqliteWorkflowRepository, Workflow, Vec<WorkflowAction>) {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let workflow = sample_workflow();
        let mut charge = sample_action(&workflow, "charge", 1, 1);
        charge.is_concurrent = true;
        charge.mode = ExecutionMode::QueuedAsync {
            queue: Some("payments".to_string()),
        };
        let actions = vec![
            sample_action(&workflow, "reserve", 0, 0),
            charge,
            sample_action(&workflow, "ship", 2, 2),
        ];
        repo.create_workflow(&workflow, &actions).await.unwrap();
        (repo, workflow, actions)
    }

    fn failure(retryable: bool) -> ActionFailure {
        ActionFailure {
            category: "connection".to_string(),
            message: "refused".to_string(),
            retryable,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_workflow_with_actions() {
        let (repo, workflow, _) = seeded().await;

        let loaded = repo.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.correlation_id, "order-7");
        assert_eq!(loaded.status, WorkflowStatus::Created);
        assert_eq!(loaded.context["order_id"], json!(7));
        assert_eq!(loaded.trigger_type.as_deref(), Some("manual"));

        let actions = repo.list_actions(&workflow.id).await.unwrap();
        let keys: Vec<&str> = actions.iter().map(|a| a.action_key.as_str()).collect();
        assert_eq!(keys, vec!["reserve", "charge", "ship"]);
        assert!(actions[1].is_concurrent);
        assert_eq!(
            actions[1].mode,
            ExecutionMode::QueuedAsync {
                queue: Some("payments".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_create_is_all_or_nothing() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let workflow = sample_workflow();
        // Duplicate index violates the unique constraint.
        let actions = vec![
            sample_action(&workflow, "a", 0, 0),
            sample_action(&workflow, "b", 0, 1),
        ];

        assert!(repo.create_workflow(&workflow, &actions).await.is_err());
        assert!(repo.get_workflow(&workflow.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_status_is_compare_and_set() {
        let (repo, workflow, _) = seeded().await;
        let now = Utc::now();

        let applied = repo
            .transition_status(
                &workflow.id,
                WorkflowStatus::Created,
                WorkflowStatus::Processing,
                StatusStamps::default(),
            )
            .await
            .unwrap();
        assert!(applied);

        let stale = repo
            .transition_status(
                &workflow.id,
                WorkflowStatus::Created,
                WorkflowStatus::Cancelled,
                StatusStamps::default(),
            )
            .await
            .unwrap();
        assert!(!stale);

        let paused = StatusStamps {
            paused_at: StampChange::Set(now),
            ..StatusStamps::default()
        };
        repo.transition_status(&workflow.id, WorkflowStatus::Processing, WorkflowStatus::Paused, paused)
            .await
            .unwrap();
        let loaded = repo.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Paused);
        assert!(loaded.paused_at.is_some());

        let resumed = StatusStamps {
            paused_at: StampChange::Clear,
            ..StatusStamps::default()
        };
        repo.transition_status(&workflow.id, WorkflowStatus::Paused, WorkflowStatus::Processing, resumed)
            .await
            .unwrap();
        let loaded = repo.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.paused_at, None);
    }

    #[tokio::test]
    async fn test_advance_index_never_lowers() {
        let (repo, workflow, _) = seeded().await;

        repo.advance_index(&workflow.id, 2).await.unwrap();
        repo.advance_index(&workflow.id, 1).await.unwrap();
        assert_eq!(
            repo.get_workflow(&workflow.id).await.unwrap().unwrap().current_action_index,
            2
        );

        repo.set_index(&workflow.id, 0).await.unwrap();
        assert_eq!(
            repo.get_workflow(&workflow.id).await.unwrap().unwrap().current_action_index,
            0
        );
    }

    #[tokio::test]
    async fn test_merge_context_is_shallow() {
        let (repo, workflow, _) = seeded().await;
        let mut updates = Context::new();
        updates.insert("order_id".to_string(), json!({"id": 8}));
        updates.insert("paid".to_string(), json!(true));

        let merged = repo.merge_context(&workflow.id, &updates).await.unwrap();

        assert_eq!(merged["order_id"], json!({"id": 8}));
        assert_eq!(merged["paid"], json!(true));
        let loaded = repo.get_workflow(&workflow.id).await.unwrap().unwrap();
        assert_eq!(loaded.context, merged);
    }

    #[tokio::test]
    async fn test_incomplete_actions_from_skips_completed() {
        let (repo, workflow, actions) = seeded().await;
        repo.complete_action(&actions[1].id, &json!("ok"), Utc::now())
            .await
            .unwrap();

        let pending = repo.incomplete_actions_from(&workflow.id, 1).await.unwrap();

        let keys: Vec<&str> = pending.iter().map(|a| a.action_key.as_str()).collect();
        assert_eq!(keys, vec!["ship"]);
    }

    #[tokio::test]
    async fn test_complete_action_only_once() {
        let (repo, _, actions) = seeded().await;
        let id = actions[0].id;
        repo.record_action_failure(&id, &failure(true), Utc::now())
            .await
            .unwrap();

        assert!(repo.complete_action(&id, &json!(1), Utc::now()).await.unwrap());
        assert!(!repo.complete_action(&id, &json!(2), Utc::now()).await.unwrap());

        let action = repo.get_action(&id).await.unwrap().unwrap();
        assert_eq!(action.result, Some(json!(1)));
        assert!(action.failed_at.is_none());
        assert!(matches!(
            repo.complete_action(&Uuid::now_v7(), &json!(1), Utc::now()).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_record_failure_caps_retry_count() {
        let (repo, _, actions) = seeded().await;
        let id = actions[0].id;

        assert_eq!(repo.record_action_failure(&id, &failure(true), Utc::now()).await.unwrap(), 1);
        assert_eq!(repo.record_action_failure(&id, &failure(true), Utc::now()).await.unwrap(), 2);
        assert_eq!(repo.record_action_failure(&id, &failure(true), Utc::now()).await.unwrap(), 2);
        assert_eq!(repo.record_action_failure(&id, &failure(false), Utc::now()).await.unwrap(), 2);

        let action = repo.get_action(&id).await.unwrap().unwrap();
        assert!(action.is_terminally_failed());
        assert!(!action.exception.unwrap().retryable);

        repo.mark_action_started(&id, Utc::now()).await.unwrap();
        repo.clear_action_failure(&id).await.unwrap();
        let cleared = repo.get_action(&id).await.unwrap().unwrap();
        assert!(cleared.failed_at.is_none());
        assert!(cleared.started_at.is_none());
        assert_eq!(cleared.retry_count, 2);
    }

    #[tokio::test]
    async fn test_reset_actions_from_index() {
        let (repo, workflow, actions) = seeded().await;
        for action in &actions {
            repo.mark_action_started(&action.id, Utc::now()).await.unwrap();
            repo.complete_action(&action.id, &json!("done"), Utc::now())
                .await
                .unwrap();
        }

        let reset = repo.reset_actions_from(&workflow.id, 1).await.unwrap();

        assert_eq!(reset, 2);
        let loaded = repo.list_actions(&workflow.id).await.unwrap();
        assert!(loaded[0].is_complete());
        assert!(!loaded[1].is_complete());
        assert!(loaded[2].started_at.is_none());
        assert_eq!(loaded[2].result, None);
    }

    #[tokio::test]
    async fn test_status_counts_groups_by_status() {
        let (repo, workflow, _) = seeded().await;
        assert_eq!(
            repo.status_counts().await.unwrap(),
            vec![(workflow.status, 1)]
        );
    }

    #[tokio::test]
    async fn test_list_workflows_filters_by_status() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        for _ in 0..3 {
            repo.create_workflow(&sample_workflow(), &[]).await.unwrap();
        }
        let processing = sample_workflow();
        repo.create_workflow(&processing, &[]).await.unwrap();
        repo.transition_status(
            &processing.id,
            WorkflowStatus::Created,
            WorkflowStatus::Processing,
            StatusStamps::default(),
        )
        .await
        .unwrap();

        assert_eq!(repo.list_workflows(None, 10).await.unwrap().len(), 4);
        assert_eq!(repo.list_workflows(None, 2).await.unwrap().len(), 2);
        let filtered = repo
            .list_workflows(Some(WorkflowStatus::Processing), 10)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, processing.id);
    }
}
