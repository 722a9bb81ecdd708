//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use vjob_core::OrchestratorError;
use vjob_models::JobId;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The remote system refused the work; the failed job still exists.
    #[error("Launch failed: {reason}")]
    LaunchFailed { job_id: JobId, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::LaunchFailed { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(id) => ApiError::not_found(format!("Job {} not found", id)),
            OrchestratorError::InvalidInput(msg) => ApiError::BadRequest(msg),
            OrchestratorError::Launch { job_id, reason } => ApiError::LaunchFailed { job_id, reason },
            OrchestratorError::Job(e) => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Store and snapshot failures stay in the server log
        let detail = match &self {
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            ApiError::LaunchFailed { reason, .. } => reason.clone(),
            _ => self.to_string(),
        };
        let job_id = match &self {
            ApiError::LaunchFailed { job_id, .. } => Some(job_id.to_string()),
            _ => None,
        };

        (status, Json(ErrorResponse { detail, job_id })).into_response()
    }
}
