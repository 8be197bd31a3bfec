use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::flow::store::StoreError;
use crate::flow::validation::ValidationReport;
use crate::persistence::gateway::GatewayError;
use crate::runtime::runner::RunError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The flow document failed structural validation.
    #[error("Invalid flow")]
    InvalidFlow(ValidationReport),

    #[error("Unauthorized")]
    Unauthorized,

    /// The request is well-formed but the session cannot take it in its current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details: Option<Value> = None;
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InvalidFlow(report) => {
                details = serde_json::to_value(report).ok();
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_FLOW",
                    "The flow document failed validation".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "TRAVERSAL_ERROR", msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound(id) => AppError::NotFound(format!("Flow '{id}' not found")),
            GatewayError::Unauthorized => AppError::Unauthorized,
            GatewayError::Invalid(v) => AppError::InvalidFlow(v.report),
            GatewayError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NodeNotFound(_) | StoreError::EdgeNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            StoreError::Invalid(v) => AppError::InvalidFlow(v.report),
            StoreError::DuplicateId(_)
            | StoreError::InvalidNodeData { .. }
            | StoreError::Malformed(_) => AppError::Validation(e.to_string()),
        }
    }
}

impl From<RunError> for AppError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Answer(inner) => AppError::Validation(inner.to_string()),
            RunError::FlowMismatch { .. }
            | RunError::Finished(_)
            | RunError::NotAwaitingAnswer(_)
            | RunError::Traversal(_) => AppError::Conflict(e.to_string()),
        }
    }
}
