//! Chunked upload endpoints
//!
//! POST /uploads/chunks, POST /uploads/:session_id/analyze

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{decode_bytes, job_response, json_body};
use crate::error::ApiResult;
use crate::models::AnalysisKind;
use crate::services::{ChunkSubmission, JobSource};
use crate::AppState;

/// POST /uploads/chunks request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    /// Base64 chunk contents
    pub bytes: String,
}

/// POST /uploads/chunks response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub session_id: String,
    pub index: u32,
    pub byte_length: u64,
    pub received_chunks: usize,
    pub total_chunks: u32,
}

/// POST /uploads/:session_id/analyze request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeSessionRequest {
    pub total_chunks: u32,
    #[serde(default)]
    pub kind: AnalysisKind,
    pub job_id: Option<Uuid>,
}

/// POST /uploads/chunks
///
/// Stage one chunk. Chunks may arrive in any order and may be resent.
pub async fn upload_chunk(
    State(state): State<AppState>,
    payload: Result<Json<ChunkRequest>, JsonRejection>,
) -> ApiResult<Json<ChunkResponse>> {
    let request = json_body(payload)?;
    let bytes = decode_bytes("bytes", &request.bytes)?;

    let record = state
        .coordinator
        .submit_chunk(ChunkSubmission {
            session_id: request.session_id,
            index: request.index,
            total_chunks: request.total_chunks,
            file_name: request.file_name,
            file_type: request.file_type,
            bytes,
        })
        .await?;
    let session = state.coordinator.chunk_store().session(&record.session_id).await?;

    Ok(Json(ChunkResponse {
        received_chunks: session.received_chunks.len(),
        total_chunks: session.total_chunks,
        session_id: record.session_id,
        index: record.index,
        byte_length: record.byte_length,
    }))
}

/// POST /uploads/:session_id/analyze
///
/// Consolidate a completed session and analyse the result.
pub async fn analyze_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Result<Json<AnalyzeSessionRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(e) => return job_response(Uuid::new_v4(), Err(e)),
    };
    let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

    let source = JobSource::Chunked {
        session_id,
        total_chunks: request.total_chunks,
    };
    let outcome = state.coordinator.analyze(job_id, source, request.kind).await;
    job_response(job_id, outcome)
}

/// Build chunked upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/uploads/chunks", post(upload_chunk))
        .route("/uploads/:session_id/analyze", post(analyze_session))
}
