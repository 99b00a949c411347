//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", handlers::workflow::workflow_routes())
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness probe.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use stepwise_types::config::OrchestratorConfig;
    use stepwise_types::definition::WorkflowDefinition;
    use tower::ServiceExt;

    use crate::state::test_support::state_with;

    async fn app() -> Router {
        let mut config = OrchestratorConfig::default();
        config.workflows.push(
            WorkflowDefinition::builder("greet")
                .then("noop")
                .then("echo")
                .build(),
        );
        config
            .workflows
            .push(WorkflowDefinition::builder("review").then("approval").build());
        config
            .workflows
            .push(WorkflowDefinition::builder("broken").then("fail").build());
        build_router(state_with(config).await)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn start_runs_inline_workflow_to_completion() {
        let app = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/workflows",
            Some(json!({"type": "greet", "context": {"user_id": 123}, "correlation_id": "req-9"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["correlation_id"], "req-9");
        assert_eq!(body["data"]["context"]["user_id"], 123);
        let id = body["data"]["id"].as_str().unwrap();
        assert_eq!(body["_links"]["self"], format!("/api/v1/workflows/{id}"));

        let (status, report) = send(&app, "GET", &format!("/api/v1/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["data"]["completed_actions"], 2);
        assert_eq!(report["data"]["actions"][1]["result"]["user_id"], 123);
    }

    #[tokio::test]
    async fn unknown_type_is_bad_request() {
        let app = app().await;
        let (status, body) =
            send(&app, "POST", "/api/v1/workflows", Some(json!({"type": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "UNKNOWN_WORKFLOW_TYPE");

        let (_, list) = send(&app, "GET", "/api/v1/workflows", None).await;
        assert_eq!(list["data"], json!([]));
    }

    #[tokio::test]
    async fn missing_workflow_is_not_found() {
        let app = app().await;
        let uri = format!("/api/v1/workflows/{}", uuid::Uuid::now_v7());
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");
    }

    #[tokio::test]
    async fn resume_completed_workflow_conflicts() {
        let app = app().await;
        let (_, body) =
            send(&app, "POST", "/api/v1/workflows", Some(json!({"type": "greet"}))).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) =
            send(&app, "POST", &format!("/api/v1/workflows/{id}/resume"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn failing_workflow_pauses_then_retry_from_out_of_range_conflicts() {
        let app = app().await;
        let (_, body) = send(
            &app,
            "POST",
            "/api/v1/workflows",
            Some(json!({"type": "broken", "context": {"fail_category": "validation"}})),
        )
        .await;
        assert_eq!(body["data"]["status"], "paused");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/workflows/{id}/retry"),
            Some(json!({"from_index": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "INDEX_OUT_OF_RANGE");

        let (status, body) =
            send(&app, "POST", &format!("/api/v1/workflows/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn complete_signals_awaiting_action() {
        let app = app().await;
        let (_, body) =
            send(&app, "POST", "/api/v1/workflows", Some(json!({"type": "review"}))).await;
        assert_eq!(body["data"]["status"], "waiting");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, report) = send(&app, "GET", &format!("/api/v1/workflows/{id}"), None).await;
        let action_id = report["data"]["actions"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/workflows/{id}/actions/{action_id}/complete"),
            Some(json!({"result": {"approved": true}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["context"]["approval_requested"], true);
    }

    #[tokio::test]
    async fn fail_reports_failure_for_awaiting_action() {
        let app = app().await;
        let (_, body) =
            send(&app, "POST", "/api/v1/workflows", Some(json!({"type": "review"}))).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let (_, report) = send(&app, "GET", &format!("/api/v1/workflows/{id}"), None).await;
        let action_id = report["data"]["actions"][0]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/workflows/{id}/actions/{action_id}/fail");

        let (status, _) = send(&app, "POST", &uri, Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            &uri,
            Some(json!({"category": "rejected", "message": "rejected by reviewer"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "paused");
    }

    #[tokio::test]
    async fn list_rejects_unknown_status_filter() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/workflows?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");

        send(&app, "POST", "/api/v1/workflows", Some(json!({"type": "greet"}))).await;
        let (status, body) =
            send(&app, "GET", "/api/v1/workflows?status=completed&limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn types_lists_builtin_and_configured() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/types", None).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["broken", "demo", "greet", "review"]);
    }
}
