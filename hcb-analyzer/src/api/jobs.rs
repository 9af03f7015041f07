//! Active job endpoints
//!
//! GET /jobs, DELETE /jobs/:job_id

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use super::JOB_ID_HEADER;
use crate::error::{ApiResult, JobError};
use crate::models::AnalysisJob;
use crate::AppState;

/// GET /jobs response
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<AnalysisJob>,
}

/// GET /jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.coordinator.registry().snapshot(),
    })
}

/// DELETE /jobs/:job_id
///
/// Request cancellation of an active job. The job itself answers its own
/// request with `CANCELLED` once it has stopped.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    if !state.coordinator.registry().cancel(job_id) {
        return Err(JobError::JobNotFound(job_id));
    }
    tracing::info!(job_id = %job_id, "Job cancellation requested");

    let mut response = StatusCode::ACCEPTED.into_response();
    if let Ok(value) = HeaderValue::from_str(&job_id.to_string()) {
        response.headers_mut().insert(JOB_ID_HEADER, value);
    }
    Ok(response)
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id", delete(cancel_job))
}
