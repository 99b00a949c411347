//! Workflow handlers for the REST API.
//!
//! Start workflows, inspect their progress, and drive the operator
//! transitions (resume, cancel, retry) plus external completion reports.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use stepwise_core::action::{ActionError, category};
use stepwise_types::workflow::{Context, StartOptions, Workflow, WorkflowStatus, WorkflowStatusReport};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::{AppState, WorkflowTypeSummary};

// ---------------------------------------------------------------------------
// Request bodies and query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    /// Maximum number of workflows to return (default 50).
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    #[serde(default)]
    pub from_index: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    #[serde(default)]
    pub category: Option<String>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Mounted at `/api/v1` by the main router.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(start_workflow).get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}/resume", post(resume_workflow))
        .route("/workflows/{id}/cancel", post(cancel_workflow))
        .route("/workflows/{id}/retry", post(retry_workflow))
        .route(
            "/workflows/{id}/actions/{action_id}/complete",
            post(complete_action),
        )
        .route("/workflows/{id}/actions/{action_id}/fail", post(fail_action))
        .route("/types", get(list_types))
}

fn workflow_link(id: Uuid) -> String {
    format!("/api/v1/workflows/{id}")
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows - Start a workflow.
pub async fn start_workflow(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let options = StartOptions {
        correlation_id: body.correlation_id,
        triggered_by: body.triggered_by,
        trigger_type: Some("api".to_string()),
    };

    let workflow = state
        .machine
        .start_workflow(&body.workflow_type, body.context, options)
        .await?;

    let link = workflow_link(workflow.id);
    Ok(Json(ApiResponse::timed(workflow, start).with_link("self", &link)))
}

/// GET /api/v1/workflows - List workflows, newest first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Workflow>>>, AppError> {
    let start = Instant::now();
    let status = query
        .status
        .as_deref()
        .map(str::parse::<WorkflowStatus>)
        .transpose()
        .map_err(AppError::Validation)?;

    let workflows = state.machine.list(status, query.limit).await?;
    Ok(Json(
        ApiResponse::timed(workflows, start).with_link("self", "/api/v1/workflows"),
    ))
}

/// GET /api/v1/workflows/{id} - Status report with every action.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowStatusReport>>, AppError> {
    let start = Instant::now();
    let report = state.machine.status(id).await?;
    Ok(Json(
        ApiResponse::timed(report, start).with_link("self", &workflow_link(id)),
    ))
}

/// POST /api/v1/workflows/{id}/resume
pub async fn resume_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let workflow = state.machine.resume(id).await?;
    Ok(Json(
        ApiResponse::timed(workflow, start).with_link("self", &workflow_link(id)),
    ))
}

/// POST /api/v1/workflows/{id}/cancel
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let workflow = state.machine.cancel(id).await?;
    Ok(Json(
        ApiResponse::timed(workflow, start).with_link("self", &workflow_link(id)),
    ))
}

/// POST /api/v1/workflows/{id}/retry - Retry a paused or failed workflow,
/// optionally rewinding to `from_index`.
pub async fn retry_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryRequest>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let workflow = state.machine.retry(id, body.from_index).await?;
    Ok(Json(
        ApiResponse::timed(workflow, start).with_link("self", &workflow_link(id)),
    ))
}

/// POST /api/v1/workflows/{id}/actions/{action_id}/complete - Report a
/// deferred action's result.
pub async fn complete_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    let workflow = state.machine.signal(id, action_id, body.result).await?;
    Ok(Json(
        ApiResponse::timed(workflow, start).with_link("workflow", &workflow_link(id)),
    ))
}

/// POST /api/v1/workflows/{id}/actions/{action_id}/fail - Report a deferred
/// action's failure. The retry policy applies.
pub async fn fail_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<FailRequest>,
) -> Result<Json<ApiResponse<Workflow>>, AppError> {
    let start = Instant::now();
    if body.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    let error = ActionError::new(
        body.category.unwrap_or_else(|| category::ERROR.to_string()),
        body.message,
    );
    let workflow = state.machine.handle_action_failed(id, action_id, error).await?;
    Ok(Json(
        ApiResponse::timed(workflow, start).with_link("workflow", &workflow_link(id)),
    ))
}

/// GET /api/v1/types - Registered workflow types.
pub async fn list_types(State(state): State<AppState>) -> Json<ApiResponse<Vec<WorkflowTypeSummary>>> {
    let start = Instant::now();
    Json(ApiResponse::timed(state.workflow_types(), start))
}
