//! Object-storage collaborator
//!
//! Lists and downloads named audio assets. The production implementation
//! talks to a Supabase storage bucket over its REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::JobError;
use crate::services::remote_fetch::stream_to_file;

/// One listed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Named-asset storage
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list(&self) -> Result<Vec<StoredObject>, JobError>;

    /// Download `name` into `dest`, returning the bytes written
    async fn download_to(&self, name: &str, dest: &Path) -> Result<u64, JobError>;
}

/// Supabase storage bucket client
pub struct SupabaseStorage {
    http_client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: Option<String>,
}

impl SupabaseStorage {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, JobError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::UpstreamStorage(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key).header("apikey", key),
            None => request,
        }
    }

    fn object_url(&self, name: &str) -> Result<reqwest::Url, JobError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| JobError::UpstreamStorage(format!("invalid storage url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| JobError::UpstreamStorage("storage url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "object", "authenticated", self.bucket.as_str()])
            .extend(name.split('/').filter(|part| !matches!(*part, "" | "." | "..")));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn list(&self) -> Result<Vec<StoredObject>, JobError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        debug!(bucket = %self.bucket, "Listing storage bucket");

        let response = self
            .authorize(self.http_client.post(&url))
            .json(&json!({
                "prefix": "",
                "limit": 1000,
                "offset": 0,
                "sortBy": { "column": "name", "order": "asc" }
            }))
            .send()
            .await
            .map_err(|e| JobError::UpstreamStorage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::UpstreamStorage(format!(
                "list answered {}: {}",
                status,
                crate::error::excerpt(body.as_bytes(), crate::error::PAYLOAD_EXCERPT_LIMIT)
            )));
        }

        let objects: Vec<StoredObject> = response
            .json()
            .await
            .map_err(|e| JobError::UpstreamStorage(format!("unreadable listing: {}", e)))?;

        info!(bucket = %self.bucket, count = objects.len(), "Storage bucket listed");
        Ok(objects)
    }

    async fn download_to(&self, name: &str, dest: &Path) -> Result<u64, JobError> {
        if name.trim().is_empty() {
            return Err(JobError::BadRequest("asset name must not be empty".to_string()));
        }

        let url = self.object_url(name)?;
        let response = self
            .authorize(self.http_client.get(url))
            .send()
            .await
            .map_err(|e| JobError::UpstreamStorage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::UpstreamStorage(format!(
                "download of {} answered {}",
                name, status
            )));
        }

        let written = stream_to_file(response, dest)
            .await
            .map_err(JobError::UpstreamStorage)?;
        info!(bucket = %self.bucket, name = %name, bytes = written, "Asset downloaded");
        Ok(written)
    }
}

/// Stand-in used when no storage URL is configured
pub struct UnconfiguredStorage;

#[async_trait]
impl ObjectStorage for UnconfiguredStorage {
    async fn list(&self) -> Result<Vec<StoredObject>, JobError> {
        Err(JobError::UpstreamStorage("object storage is not configured".to_string()))
    }

    async fn download_to(&self, _name: &str, _dest: &Path) -> Result<u64, JobError> {
        Err(JobError::UpstreamStorage("object storage is not configured".to_string()))
    }
}

/// Build the storage collaborator from configuration
pub fn from_config(
    config: &StorageConfig,
    timeout: Duration,
) -> Result<Box<dyn ObjectStorage>, JobError> {
    match &config.url {
        Some(url) => Ok(Box::new(SupabaseStorage::new(
            url.clone(),
            config.bucket.clone(),
            config.api_key.clone(),
            timeout,
        )?)),
        None => Ok(Box::new(UnconfiguredStorage)),
    }
}
