//! Object-storage asset endpoints
//!
//! GET /assets, POST /assets/:name/analyze

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{job_response, json_body};
use crate::error::ApiResult;
use crate::models::AnalysisKind;
use crate::services::{JobSource, StoredObject};
use crate::AppState;

/// GET /assets response
#[derive(Debug, Serialize)]
pub struct AssetListResponse {
    pub assets: Vec<StoredObject>,
}

/// POST /assets/:name/analyze request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAssetRequest {
    #[serde(default = "default_asset_kind")]
    pub kind: AnalysisKind,
    pub job_id: Option<Uuid>,
}

impl Default for AnalyzeAssetRequest {
    fn default() -> Self {
        Self {
            kind: default_asset_kind(),
            job_id: None,
        }
    }
}

fn default_asset_kind() -> AnalysisKind {
    AnalysisKind::FeatureSet
}

/// GET /assets
pub async fn list_assets(State(state): State<AppState>) -> ApiResult<Json<AssetListResponse>> {
    let assets = state.coordinator.list_assets().await?;
    Ok(Json(AssetListResponse { assets }))
}

/// POST /assets/:name/analyze
///
/// Analyse a stored asset. The body is optional; feature extraction is the
/// default for stored assets.
pub async fn analyze_asset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<AnalyzeAssetRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => AnalyzeAssetRequest::default(),
        other => match json_body(other) {
            Ok(request) => request,
            Err(e) => return job_response(Uuid::new_v4(), Err(e)),
        },
    };
    let job_id = request.job_id.unwrap_or_else(Uuid::new_v4);

    let outcome = state
        .coordinator
        .analyze(job_id, JobSource::Stored { name }, request.kind)
        .await;
    job_response(job_id, outcome)
}

/// Build asset routes
pub fn asset_routes() -> Router<AppState> {
    Router::new()
        .route("/assets", get(list_assets))
        .route("/assets/:name/analyze", post(analyze_asset))
}
