//! Job handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vjob_core::ReconcileReport;
use vjob_models::{Job, JobId, JobSummary, ResourceTier};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub input_ref: String,
    #[serde(default)]
    pub resource_tier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// Submit a job and launch its remote task.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let tier = match request.resource_tier.as_deref() {
        Some(tier) => tier
            .parse::<ResourceTier>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => ResourceTier::default(),
    };

    let job_id = state.orchestrator.submit(&request.input_ref, tier).await?;
    info!(job_id = %job_id, input_ref = %request.input_ref, "Job submitted");

    Ok((StatusCode::CREATED, Json(SubmitJobResponse { job_id })))
}

/// Get the full record of one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.orchestrator.get(&JobId::from(job_id)).await?;
    Ok(Json(job))
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobSummary>>> {
    Ok(Json(state.orchestrator.list().await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub created_or_updated_count: usize,
    pub imported_outputs: usize,
    pub recovered_tasks: usize,
    pub updated_jobs: usize,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            created_or_updated_count: report.total(),
            imported_outputs: report.imported_outputs,
            recovered_tasks: report.recovered_tasks,
            updated_jobs: report.updated_jobs,
        }
    }
}

/// Run a reconciliation pass now.
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<Json<ReconcileResponse>> {
    let report = state.orchestrator.reconcile().await?;
    Ok(Json(report.into()))
}
