//! API error types and responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use cluster_shared_types::OrchestrationError;

/// API error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Optional details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, "NOT_FOUND")
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(message, "INTERNAL_ERROR")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(message, "CONFLICT")
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(message, "PRECONDITION_FAILED")
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(message, "VALIDATION_ERROR")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "PRECONDITION_FAILED" => StatusCode::PRECONDITION_FAILED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        let message = err.to_string();
        match err {
            OrchestrationError::Validation(_) => ApiError::validation_error(message),
            OrchestrationError::AlreadyInitialized => ApiError::conflict(message),
            OrchestrationError::OperationInProgress(phase) => ApiError::conflict(message)
                .with_details(serde_json::json!({ "phase": phase.as_str() })),
            OrchestrationError::NotInitialized(_) => ApiError::precondition_failed(message),
            OrchestrationError::NotFound(_) => ApiError::not_found(message),
            OrchestrationError::Task { group, task, .. } => ApiError::internal_error(message)
                .with_details(serde_json::json!({ "group": group.as_str(), "task": task })),
            OrchestrationError::SystemError(_)
            | OrchestrationError::StateError(_)
            | OrchestrationError::ClusterError(_)
            | OrchestrationError::ConfigError(_)
            | OrchestrationError::InternalError(_) => ApiError::internal_error(message),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_shared_types::{ClusterPhase, TaskGroup};

    fn status_of(err: OrchestrationError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(OrchestrationError::validation("version is required")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(OrchestrationError::AlreadyInitialized), StatusCode::CONFLICT);
        assert_eq!(
            status_of(OrchestrationError::OperationInProgress(ClusterPhase::Upgrading)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrchestrationError::not_initialized("no cluster")),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_of(OrchestrationError::NotFound("audit".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrchestrationError::SystemError("disk full".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_in_progress_details() {
        let err: ApiError = OrchestrationError::OperationInProgress(ClusterPhase::Provisioning).into();
        assert_eq!(err.code, "CONFLICT");
        assert_eq!(err.details.unwrap()["phase"], "Provisioning");
    }

    #[test]
    fn test_task_error_details() {
        let err: ApiError = OrchestrationError::Task {
            group: TaskGroup::Pre,
            task: "cordon-node".to_string(),
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert!(err.error.contains("pre-task cordon-node"));
        assert_eq!(err.details.unwrap()["task"], "cordon-node");
    }
}
