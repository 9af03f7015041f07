//! Error types for hcb-analyzer
//!
//! Every failure of a job is classified into exactly one [`JobError`]
//! variant. All variants are terminal for the job; none are retried here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for captured stderr carried in an error
pub const STDERR_EXCERPT_LIMIT: usize = 2048;

/// Upper bound for raw engine payload carried in an error
pub const PAYLOAD_EXCERPT_LIMIT: usize = 512;

/// Missing chunk indices listed in a message before eliding
const MISSING_LIST_LIMIT: usize = 16;

/// Classified job failure
#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or invalid input shape (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Remote fetch collaborator failed or answered non-2xx
    #[error("Remote fetch failed: {0}")]
    UpstreamFetch(String),

    /// Object-storage collaborator failed
    #[error("Object storage failed: {0}")]
    UpstreamStorage(String),

    /// No chunk was ever recorded for the session
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    /// Session declared a different chunk count earlier
    #[error("Upload session {session_id} declared {recorded} chunks, request declared {requested}")]
    SessionInconsistency {
        session_id: String,
        recorded: u32,
        requested: u32,
    },

    /// At least one chunk index in `[0, total)` is missing
    #[error("Upload session {session_id} is incomplete, missing chunks {}", format_missing(.missing))]
    IncompleteUpload {
        session_id: String,
        missing: Vec<u32>,
    },

    /// Read/write failure while materialising an artifact
    #[error("Consolidation I/O failed: {0}")]
    ConsolidationIo(String),

    /// Analysis engine could not be started or its pipes could not be read
    #[error("Failed to run analysis engine {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    /// Analysis engine did not exit in time and was killed
    #[error("Analysis engine exceeded {}ms timeout", .timeout.as_millis())]
    ProcessTimeout { timeout: Duration },

    /// Analysis engine exited non-zero
    #[error("Analysis engine exited with code {exit_code}")]
    ProcessFailed { exit_code: i32, stderr: String },

    /// Analysis engine exited 0 without writing to stdout
    #[error("Analysis engine produced no output")]
    EmptyOutput,

    /// Engine stdout is not a parseable JSON document
    #[error("Analysis output is not valid JSON: {reason}")]
    MalformedOutput { reason: String, excerpt: String },

    /// Engine stdout parsed but a field is missing or invalid
    #[error("Analysis output field `{field}` is invalid: {reason}")]
    SchemaViolation { field: String, reason: String },

    /// Job was cancelled by the caller
    #[error("Job cancelled")]
    Cancelled,

    /// No active job with the id
    #[error("No active job {0}")]
    JobNotFound(uuid::Uuid),
}

impl JobError {
    /// Stable error code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            JobError::BadRequest(_) => "BAD_REQUEST",
            JobError::UpstreamFetch(_) => "UPSTREAM_FETCH_ERROR",
            JobError::UpstreamStorage(_) => "UPSTREAM_STORAGE_ERROR",
            JobError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            JobError::SessionInconsistency { .. } => "SESSION_INCONSISTENCY",
            JobError::IncompleteUpload { .. } => "INCOMPLETE_UPLOAD",
            JobError::ConsolidationIo(_) => "CONSOLIDATION_IO_ERROR",
            JobError::ProcessSpawn { .. } => "PROCESS_SPAWN_ERROR",
            JobError::ProcessTimeout { .. } => "PROCESS_TIMEOUT",
            JobError::ProcessFailed { .. } => "PROCESS_FAILED",
            JobError::EmptyOutput => "EMPTY_OUTPUT",
            JobError::MalformedOutput { .. } => "MALFORMED_OUTPUT",
            JobError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            JobError::Cancelled => "CANCELLED",
            JobError::JobNotFound(_) => "JOB_NOT_FOUND",
        }
    }

    /// HTTP status for the error
    pub fn status(&self) -> StatusCode {
        match self {
            JobError::BadRequest(_) => StatusCode::BAD_REQUEST,
            JobError::SessionNotFound(_) | JobError::JobNotFound(_) => StatusCode::NOT_FOUND,
            JobError::SessionInconsistency { .. }
            | JobError::IncompleteUpload { .. }
            | JobError::Cancelled => StatusCode::CONFLICT,
            JobError::UpstreamFetch(_)
            | JobError::UpstreamStorage(_)
            | JobError::ProcessFailed { .. }
            | JobError::EmptyOutput
            | JobError::MalformedOutput { .. }
            | JobError::SchemaViolation { .. } => StatusCode::BAD_GATEWAY,
            JobError::ProcessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            JobError::ConsolidationIo(_) | JobError::ProcessSpawn { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Structured, size-bounded diagnostics for the response body
    pub fn details(&self) -> Option<Value> {
        match self {
            JobError::SessionInconsistency {
                recorded,
                requested,
                ..
            } => Some(json!({ "recorded_total": recorded, "requested_total": requested })),
            JobError::IncompleteUpload { missing, .. } => Some(json!({
                "missing": missing.iter().take(MISSING_LIST_LIMIT).collect::<Vec<_>>(),
                "missing_count": missing.len(),
            })),
            JobError::ProcessTimeout { timeout } => {
                Some(json!({ "timeout_ms": timeout.as_millis() as u64 }))
            }
            JobError::ProcessFailed { exit_code, stderr } => {
                Some(json!({ "exit_code": exit_code, "stderr": stderr }))
            }
            JobError::MalformedOutput { excerpt, .. } => Some(json!({ "excerpt": excerpt })),
            JobError::SchemaViolation { field, .. } => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for job operations and API handlers
pub type ApiResult<T> = Result<T, JobError>;

/// Lossy UTF-8 excerpt of at most `limit` bytes, cut on a char boundary
pub fn excerpt(bytes: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= limit {
        return text.into_owned();
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[{} bytes truncated]", &text[..end], text.len() - end)
}

fn format_missing(missing: &[u32]) -> String {
    let shown = missing
        .iter()
        .take(MISSING_LIST_LIMIT)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if missing.len() > MISSING_LIST_LIMIT {
        format!("[{}, ... {} more]", shown, missing.len() - MISSING_LIST_LIMIT)
    } else {
        format!("[{}]", shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_payload_untouched() {
        assert_eq!(excerpt(b"{\"bpm\":", 512), "{\"bpm\":");
    }

    #[test]
    fn test_excerpt_bounds_long_payload() {
        let payload = vec![b'a'; 10_000];
        let text = excerpt(&payload, 512);
        assert!(text.starts_with(&"a".repeat(512)));
        assert!(text.ends_with("[9488 bytes truncated]"));
    }

    #[test]
    fn test_excerpt_respects_char_boundary() {
        // "é" is two bytes; a limit of 3 would split the second one
        let text = excerpt("éé".as_bytes(), 3);
        assert!(text.starts_with('é'));
        assert!(!text.starts_with("éé"));
    }

    #[test]
    fn test_incomplete_upload_message_elides_long_lists() {
        let err = JobError::IncompleteUpload {
            session_id: "s".to_string(),
            missing: (0..40).collect(),
        };
        let message = err.to_string();
        assert!(message.contains("24 more"));
        assert_eq!(err.code(), "INCOMPLETE_UPLOAD");
        assert_eq!(err.details().unwrap()["missing_count"], 40);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(JobError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(JobError::SessionNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            JobError::ProcessTimeout { timeout: Duration::from_secs(1) }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(JobError::EmptyOutput.status(), StatusCode::BAD_GATEWAY);
    }
}
