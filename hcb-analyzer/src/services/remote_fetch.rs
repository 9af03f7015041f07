//! Remote-fetch collaborator
//!
//! Downloads an audio asset by URL, streaming the body straight to disk.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::JobError;

const USER_AGENT: &str = concat!("hcb-analyzer/", env!("CARGO_PKG_VERSION"));

/// Outcome of a completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub content_type: Option<String>,
    pub byte_length: u64,
}

/// Fetches a URL into a local file
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Write the body of `url` to `dest`. Non-2xx answers and transport
    /// failures are `UpstreamFetch`; `dest` may be left partially written.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, JobError>;
}

/// `reqwest`-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, JobError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::UpstreamFetch(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, JobError> {
        let parsed = Url::parse(url)
            .map_err(|e| JobError::BadRequest(format!("invalid url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(JobError::BadRequest(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        debug!(url = %parsed, "Fetching remote asset");

        let response = self
            .http_client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| JobError::UpstreamFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::UpstreamFetch(format!(
                "{} answered {}",
                parsed, status
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let byte_length = stream_to_file(response, dest)
            .await
            .map_err(JobError::UpstreamFetch)?;

        info!(
            url = %parsed,
            content_type = content_type.as_deref().unwrap_or("unknown"),
            byte_length,
            "Remote asset downloaded"
        );

        Ok(FetchedFile {
            content_type,
            byte_length,
        })
    }
}

/// Stream a response body into `dest`, returning the bytes written
pub(crate) async fn stream_to_file(response: Response, dest: &Path) -> Result<u64, String> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| format!("create {}: {}", dest.display(), e))?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| format!("reading body: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("write {}: {}", dest.display(), e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| format!("flush {}: {}", dest.display(), e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Router};

    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/track",
                get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], vec![42u8; 70_000]) }),
            )
            .route(
                "/gone",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "no such track") }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_streams_body_and_reports_content_type() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("download");

        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();
        let fetched = fetcher.fetch_to(&format!("{}/track", base), &dest).await.unwrap();

        assert_eq!(fetched.content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(fetched.byte_length, 70_000);
        assert_eq!(tokio::fs::read(&dest).await.unwrap().len(), 70_000);
    }

    #[tokio::test]
    async fn test_non_success_is_upstream_fetch_error() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();
        let err = fetcher
            .fetch_to(&format!("{}/gone", base), &dir.path().join("x"))
            .await
            .unwrap_err();

        match err {
            JobError::UpstreamFetch(message) => assert!(message.contains("404")),
            other => panic!("expected UpstreamFetch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_urls_are_bad_requests() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(10)).unwrap();

        for url in ["not a url", "file:///etc/passwd"] {
            let err = fetcher.fetch_to(url, &dir.path().join("x")).await.unwrap_err();
            assert!(matches!(err, JobError::BadRequest(_)), "{} accepted", url);
        }
    }
}
