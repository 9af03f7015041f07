//! hcb-analyzer library interface
//!
//! Exposes the job pipeline and HTTP router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiResult, JobError};

use axum::{extract::DefaultBodyLimit, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::services::JobCoordinator;

/// Default request body limit when none is configured
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Job pipeline
    pub coordinator: Arc<JobCoordinator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(coordinator: JobCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            startup_time: Utc::now(),
            max_body_bytes: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .merge(api::health_routes())
        .merge(api::analyze_routes())
        .merge(api::upload_routes())
        .merge(api::asset_routes())
        .merge(api::job_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
