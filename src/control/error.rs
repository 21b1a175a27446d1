//! Control protocol errors with structured JSON responses.
//!
//! Server-side variants map to an HTTP status and a stable error code;
//! client-side variants classify transport failures so the scanner can
//! treat them as task failures rather than crashes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::types::TaskId;

/// Structured error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Busy with task {current}, refusing task {requested}")]
    Busy { current: TaskId, requested: TaskId },

    #[error("{role} does not support '{op}'")]
    Unsupported { role: &'static str, op: &'static str },

    #[error("Task {task_id} failed: {reason}")]
    TaskFailed { task_id: TaskId, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Cannot connect to {0}")]
    Connect(String),

    #[error("Request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Remote error {status} {code}: {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ControlError {
    /// Transport-level failure: the peer could not be reached or answered.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Timeout { .. } | Self::Http(_) | Self::UnexpectedResponse(_)
        )
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ControlError::Busy { .. } => (StatusCode::CONFLICT, "BUSY", self.to_string()),
            ControlError::Unsupported { .. } => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED", self.to_string())
            }
            ControlError::TaskFailed { task_id, reason } => {
                tracing::error!(task_id = %task_id, reason, "Control request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TASK_FAILED",
                    self.to_string(),
                )
            }
            other => {
                tracing::error!(detail = %other, "Control internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
