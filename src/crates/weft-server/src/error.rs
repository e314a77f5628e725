//! Server error types and HTTP mapping
//!
//! [`ServerError`] covers internal failures; [`ApiError`] is the HTTP-facing
//! type every handler returns, carrying a status code and a stable `code`
//! string. Admission failures keep the codes and statuses the editor relies
//! on (503 queue, 404 workflow, quota codes with reset metadata).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use weft_validate::ValidationReport;

/// Internal server failures
#[derive(Debug, Error)]
pub enum ServerError {
    /// Database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Admission rejections, in the order the checks run
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The queue is down or no execution worker is alive
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The workflow does not exist or cannot be published
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The organization is out of execution quota
    #[error("Execution quota exceeded, resets at {resets_at}")]
    ExecutionQuotaExceeded { resets_at: DateTime<Utc> },

    /// Too many in-flight calls to one connector
    #[error("Connector '{connector}' is at its concurrency cap")]
    ConnectorConcurrencyExceeded { connector: String },

    /// A cross-cutting usage quota tripped
    #[error("Usage quota '{quota_type}' exceeded")]
    UsageQuotaExceeded { quota_type: String },
}

/// HTTP-facing error
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The graph failed validation
    #[error("Validation failed with {} error(s)", .0.errors.len())]
    ValidationFailed(ValidationReport),

    /// Publish blocked on a missing migration plan
    #[error("Migration plan required: {0}")]
    MigrationPlanRequired(String),

    /// Admission rejected the run
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Anything else
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// API result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Always false
    pub success: bool,
    /// Stable code for programmatic handling
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Extra fields (quota reset timestamps, validation reports)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::MigrationPlanRequired(_) => StatusCode::CONFLICT,
            ApiError::Admission(admission) => match admission {
                AdmissionError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                AdmissionError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
                AdmissionError::ExecutionQuotaExceeded { .. }
                | AdmissionError::ConnectorConcurrencyExceeded { .. }
                | AdmissionError::UsageQuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code string
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationFailed(_) => "VALIDATION_FAILED",
            ApiError::MigrationPlanRequired(_) => "MIGRATION_PLAN_REQUIRED",
            ApiError::Admission(admission) => match admission {
                AdmissionError::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
                AdmissionError::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
                AdmissionError::ExecutionQuotaExceeded { .. } => "EXECUTION_QUOTA_EXCEEDED",
                AdmissionError::ConnectorConcurrencyExceeded { .. } => {
                    "CONNECTOR_CONCURRENCY_EXCEEDED"
                }
                AdmissionError::UsageQuotaExceeded { .. } => "USAGE_QUOTA_EXCEEDED",
            },
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            ApiError::ValidationFailed(report) => {
                json!({ "validation": report })
            }
            ApiError::Admission(AdmissionError::ExecutionQuotaExceeded { resets_at }) => {
                json!({ "resetsAt": resets_at })
            }
            ApiError::Admission(AdmissionError::UsageQuotaExceeded { quota_type }) => {
                json!({ "quotaType": quota_type })
            }
            ApiError::Admission(AdmissionError::ConnectorConcurrencyExceeded { connector }) => {
                json!({ "connector": connector })
            }
            _ => serde_json::Value::Null,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ApiErrorBody {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
