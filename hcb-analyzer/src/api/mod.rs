//! HTTP API handlers for hcb-analyzer

pub mod analyze;
pub mod assets;
pub mod health;
pub mod jobs;
pub mod uploads;

pub use analyze::analyze_routes;
pub use assets::asset_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use uploads::upload_routes;

use axum::{
    extract::rejection::JsonRejection,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiResult, JobError};
use crate::models::AnalysisResult;

/// Response header carrying the job id
pub const JOB_ID_HEADER: &str = "x-job-id";

/// Successful analysis response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub job_id: Uuid,
    pub result: AnalysisResult,
}

/// Unwrap a JSON body, reporting rejections as `BAD_REQUEST`
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| JobError::BadRequest(rejection.body_text()))
}

/// Decode a base64 file payload
pub(crate) fn decode_bytes(field: &str, encoded: &str) -> ApiResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| JobError::BadRequest(format!("{} is not valid base64: {}", field, e)))
}

/// Render an analysis outcome with the `x-job-id` header, success or not
pub(crate) fn job_response(job_id: Uuid, outcome: ApiResult<AnalysisResult>) -> Response {
    let mut response = outcome
        .map(|result| Json(AnalyzeResponse { job_id, result }))
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&job_id.to_string()) {
        response.headers_mut().insert(JOB_ID_HEADER, value);
    }
    response
}
