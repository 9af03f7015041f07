//! Direct analysis endpoints
//!
//! POST /analyze/url, POST /analyze/upload

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{decode_bytes, job_response, json_body};
use crate::models::AnalysisKind;
use crate::services::JobSource;
use crate::AppState;

/// POST /analyze/url request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeUrlRequest {
    pub url: String,
    #[serde(default)]
    pub kind: AnalysisKind,
    pub job_id: Option<Uuid>,
}

/// POST /analyze/upload request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeUploadRequest {
    pub file_name: String,
    pub file_type: Option<String>,
    /// Base64 file contents
    pub bytes: String,
    #[serde(default)]
    pub kind: AnalysisKind,
    pub job_id: Option<Uuid>,
}

/// POST /analyze/url
///
/// Fetch a remote audio file and analyse it.
pub async fn analyze_url(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeUrlRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(e) => return job_response(Uuid::new_v4(), Err(e)),
    };
    let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

    let outcome = state
        .coordinator
        .analyze(job_id, JobSource::Url(request.url), request.kind)
        .await;
    job_response(job_id, outcome)
}

/// POST /analyze/upload
///
/// Analyse an audio file sent inline as base64.
pub async fn analyze_upload(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeUploadRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(e) => return job_response(Uuid::new_v4(), Err(e)),
    };
    let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

    let bytes = match decode_bytes("bytes", &request.bytes) {
        Ok(bytes) => bytes,
        Err(e) => return job_response(job_id, Err(e)),
    };

    let source = JobSource::Upload {
        file_name: request.file_name,
        file_type: request.file_type,
        bytes,
    };
    let outcome = state.coordinator.analyze(job_id, source, request.kind).await;
    job_response(job_id, outcome)
}

/// Build direct analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze/url", post(analyze_url))
        .route("/analyze/upload", post(analyze_upload))
}
