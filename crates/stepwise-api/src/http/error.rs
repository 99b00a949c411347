//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use stepwise_core::workflow::OrchestratorError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Orchestrator(OrchestratorError),
    /// Malformed request input.
    Validation(String),
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Orchestrator(e)
    }
}

impl AppError {
    /// Status code and machine-readable error code.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Orchestrator(e) => match e {
                OrchestratorError::WorkflowNotFound(_) => {
                    (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND")
                }
                OrchestratorError::ActionNotFound(_) => (StatusCode::NOT_FOUND, "ACTION_NOT_FOUND"),
                OrchestratorError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION")
                }
                OrchestratorError::IndexOutOfRange { .. } => {
                    (StatusCode::CONFLICT, "INDEX_OUT_OF_RANGE")
                }
                OrchestratorError::UnknownWorkflowType(_) => {
                    (StatusCode::BAD_REQUEST, "UNKNOWN_WORKFLOW_TYPE")
                }
                OrchestratorError::UnknownAction(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_ACTION"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ORCHESTRATOR_ERROR"),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Orchestrator(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        }

        let mut response = ApiResponse::error(code, &self.message(), uuid::Uuid::now_v7().to_string(), 0)
            .into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::workflow::{Transition, WorkflowStatus};
    use uuid::Uuid;

    #[test]
    fn orchestrator_errors_map_to_status_codes() {
        let cases = [
            (OrchestratorError::WorkflowNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                OrchestratorError::InvalidTransition {
                    workflow_id: Uuid::nil(),
                    transition: Transition::Resume,
                    from: WorkflowStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (OrchestratorError::IndexOutOfRange { index: 5, max: 2 }, StatusCode::CONFLICT),
            (
                OrchestratorError::UnknownWorkflowType("nope".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).classify().0, expected);
        }
    }

    #[test]
    fn validation_is_bad_request() {
        let response = AppError::Validation("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
