//! Orchestrator error types.

use thiserror::Error;

use vjob_models::{JobError, JobId};

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Launch failed for job {job_id}: {reason}")]
    Launch { job_id: JobId, reason: String },

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn not_found(id: &JobId) -> Self {
        Self::NotFound(id.clone())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn launch(job_id: &JobId, reason: impl Into<String>) -> Self {
        Self::Launch {
            job_id: job_id.clone(),
            reason: reason.into(),
        }
    }

    /// Check if the store could not durably record a change.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Persistence(_) | OrchestratorError::Io(_) | OrchestratorError::Json(_)
        )
    }
}
