//! Shared fixtures for hcb-analyzer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::util::ServiceExt;

use hcb_analyzer::config::EngineConfig;
use hcb_analyzer::services::{
    ChunkStore, FetchedFile, JobCoordinator, ObjectStorage, RemoteFetcher, StoredObject,
};
use hcb_analyzer::{build_router, AppState, JobError};

pub const BEAT_GRID_JSON: &str = r#"{"bpm":128.0,"beats":[0.47,0.94,1.41],"beats_confidence":[0.9,0.85,0.8],"beats_intervals":[0.47,0.47,0.47]}"#;

/// Remote fetcher serving one fixed body for hosts containing "ok"
pub struct StaticFetcher;

#[async_trait]
impl RemoteFetcher for StaticFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, JobError> {
        if !url.contains("ok") {
            return Err(JobError::UpstreamFetch(format!("GET {} answered 404", url)));
        }
        let body = b"ID3fake-mp3";
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| JobError::UpstreamFetch(e.to_string()))?;
        Ok(FetchedFile {
            content_type: Some("audio/mpeg".to_string()),
            byte_length: body.len() as u64,
        })
    }
}

/// Object storage holding a single asset, `song.mp3`
pub struct OneAssetStorage;

#[async_trait]
impl ObjectStorage for OneAssetStorage {
    async fn list(&self) -> Result<Vec<StoredObject>, JobError> {
        Ok(vec![StoredObject {
            name: "song.mp3".to_string(),
            id: Some("1".to_string()),
            updated_at: None,
            metadata: None,
        }])
    }

    async fn download_to(&self, name: &str, dest: &Path) -> Result<u64, JobError> {
        if name != "song.mp3" {
            return Err(JobError::UpstreamStorage(format!("object {} not found", name)));
        }
        tokio::fs::write(dest, b"stored-audio")
            .await
            .map_err(|e| JobError::UpstreamStorage(e.to_string()))?;
        Ok(12)
    }
}

/// Test application backed by a scratch root and a `/bin/sh` engine
pub struct TestApp {
    pub root: tempfile::TempDir,
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// `script` runs as `sh -c script engine <artifact>`
    pub fn new(script: &str) -> Self {
        Self::with_timeout(script, 30)
    }

    pub fn with_timeout(script: &str, timeout_secs: u64) -> Self {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let staging = root.path().join("staging");
        let artifacts = root.path().join("artifacts");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&artifacts).unwrap();

        let args = vec!["-c".to_string(), script.to_string(), "engine".to_string()];
        let engine = EngineConfig {
            program: PathBuf::from("/bin/sh"),
            beat_grid_args: args.clone(),
            feature_set_args: args,
            working_dir: None,
            timeout_secs,
        };

        let coordinator = JobCoordinator::new(
            ChunkStore::new(staging, 1024 * 1024),
            artifacts,
            engine,
            Arc::new(StaticFetcher),
            Arc::new(OneAssetStorage),
        );
        let state = AppState::new(coordinator);
        let router = build_router(state.clone());

        Self {
            root,
            router,
            state,
        }
    }

    pub fn artifacts(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.root.path().join("artifacts"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await.into_json()
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body).await.into_json()
    }

    pub async fn post_raw(&self, uri: &str, body: Value) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let job_id = response
            .headers()
            .get("x-job-id")
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            job_id,
            body: body.to_vec(),
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub job_id: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn into_json(self) -> (StatusCode, Value) {
        let json = self.json();
        (self.status, json)
    }
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Engine that echoes a beat grid only if its input equals `expected`
pub fn expecting(expected: &str) -> String {
    format!(
        r#"[ "$(cat "$1")" = "{}" ] && echo '{}' || {{ echo "unexpected input" >&2; exit 3; }}"#,
        expected, BEAT_GRID_JSON
    )
}
