//! Job coordinator
//!
//! Drives one job through
//! `RECEIVED → FETCHING | CONSOLIDATING → ANALYZING → DECODING → SUCCEEDED | FAILED`.
//! Stages run strictly in sequence; the first classified error ends the job.
//! No stage is retried here. Transient artifacts are removed on every
//! terminal path, including the caller dropping the job future.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::JobError;
use crate::models::{
    AnalysisJob, AnalysisKind, AnalysisResult, Artifact, ArtifactOrigin, ChunkMeta, ChunkRecord,
    JobState,
};
use crate::services::chunk_store::ChunkStore;
use crate::services::consolidator::Consolidator;
use crate::services::job_registry::JobRegistry;
use crate::services::object_storage::{ObjectStorage, StoredObject};
use crate::services::process_runner::ProcessRunner;
use crate::services::remote_fetch::RemoteFetcher;
use crate::services::result_decoder;
use crate::utils::{extension_for_content_type, file_extension};

/// Where the job's audio comes from
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Remote reference
    Url(String),
    /// Whole file in the request
    Upload {
        file_name: String,
        file_type: Option<String>,
        bytes: Vec<u8>,
    },
    /// Previously staged chunks
    Chunked {
        session_id: String,
        total_chunks: u32,
    },
    /// Named asset in object storage
    Stored { name: String },
}

impl JobSource {
    fn describe(&self) -> String {
        match self {
            JobSource::Url(url) => format!("url:{}", url),
            JobSource::Upload { file_name, .. } => format!("upload:{}", file_name),
            JobSource::Chunked { session_id, .. } => format!("session:{}", session_id),
            JobSource::Stored { name } => format!("storage:{}", name),
        }
    }

    fn first_stage(&self) -> JobState {
        match self {
            JobSource::Chunked { .. } => JobState::Consolidating,
            _ => JobState::Fetching,
        }
    }
}

/// One chunk of a chunked upload
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Removes the job from the registry and its artifact from disk when the
/// job ends, however it ends
struct JobGuard {
    registry: JobRegistry,
    job_id: Uuid,
    artifact: Option<PathBuf>,
}

impl JobGuard {
    fn hold(&mut self, artifact: &Artifact) {
        self.artifact = Some(artifact.path.clone());
    }

    async fn release_artifact(&mut self) {
        if let Some(path) = self.artifact.take() {
            remove_quietly(&path).await;
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(self.job_id);

        if let Some(path) = self.artifact.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { remove_quietly(&path).await });
            }
        }
    }
}

/// Job coordinator façade
pub struct JobCoordinator {
    chunk_store: ChunkStore,
    consolidator: Consolidator,
    runner: ProcessRunner,
    engine: EngineConfig,
    fetcher: Arc<dyn RemoteFetcher>,
    storage: Arc<dyn ObjectStorage>,
    artifacts_dir: PathBuf,
    registry: JobRegistry,
}

impl JobCoordinator {
    pub fn new(
        chunk_store: ChunkStore,
        artifacts_dir: impl Into<PathBuf>,
        engine: EngineConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let artifacts_dir = artifacts_dir.into();
        Self {
            consolidator: Consolidator::new(chunk_store.clone(), artifacts_dir.clone()),
            chunk_store,
            runner: ProcessRunner::new(),
            engine,
            fetcher,
            storage,
            artifacts_dir,
            registry: JobRegistry::new(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunk_store
    }

    /// Stage one chunk of a chunked upload
    pub async fn submit_chunk(&self, chunk: ChunkSubmission) -> Result<ChunkRecord, JobError> {
        self.chunk_store
            .put_with_meta(
                &chunk.session_id,
                chunk.index,
                chunk.total_chunks,
                &chunk.bytes,
                ChunkMeta {
                    file_name: chunk.file_name,
                    file_type: chunk.file_type,
                },
            )
            .await
    }

    /// Object-storage listing
    pub async fn list_assets(&self) -> Result<Vec<StoredObject>, JobError> {
        self.storage.list().await
    }

    /// Run one job to completion
    pub async fn analyze(
        &self,
        job_id: Uuid,
        source: JobSource,
        kind: AnalysisKind,
    ) -> Result<AnalysisResult, JobError> {
        let cancel = CancellationToken::new();
        let mut job = AnalysisJob::new(job_id, kind, source.describe());
        self.registry.register(job.clone(), cancel.clone())?;

        let mut guard = JobGuard {
            registry: self.registry.clone(),
            job_id,
            artifact: None,
        };
        let started = Instant::now();
        info!(job_id = %job_id, kind = %kind, source = %job.source, "Job received");

        let outcome = self.drive(&mut job, &mut guard, source, &cancel).await;

        let terminal = match &outcome {
            Ok(_) => JobState::Succeeded,
            Err(JobError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        self.transition(&mut job, terminal);
        guard.release_artifact().await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(job_id = %job_id, elapsed_ms, "Job succeeded"),
            Err(e) => warn!(
                job_id = %job_id,
                code = e.code(),
                error = %e,
                elapsed_ms,
                "Job failed"
            ),
        }

        outcome
    }

    async fn drive(
        &self,
        job: &mut AnalysisJob,
        guard: &mut JobGuard,
        source: JobSource,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, JobError> {
        self.transition(job, source.first_stage());
        let artifact = self.materialize(job.job_id, source).await?;
        guard.hold(&artifact);
        ensure_active(cancel)?;

        self.transition(job, JobState::Analyzing);
        let invocation = self.engine.invocation(job.kind);
        let output = self.runner.run(&invocation, artifact.path(), cancel).await?;
        let stdout = output.into_stdout()?;
        ensure_active(cancel)?;

        self.transition(job, JobState::Decoding);
        result_decoder::decode(&stdout, job.kind)
    }

    fn transition(&self, job: &mut AnalysisJob, state: JobState) {
        if let Some(transition) = job.transition_to(state) {
            self.registry.update_state(job.job_id, state);
            info!(
                job_id = %job.job_id,
                from = ?transition.old_state,
                to = ?transition.new_state,
                "Job state transition"
            );
        }
    }

    /// Produce the local artifact for a source
    async fn materialize(&self, job_id: Uuid, source: JobSource) -> Result<Artifact, JobError> {
        match source {
            JobSource::Url(url) => self.download(job_id, &url).await,
            JobSource::Upload {
                file_name,
                file_type,
                bytes,
            } => self.save_upload(job_id, &file_name, file_type.as_deref(), &bytes).await,
            JobSource::Chunked {
                session_id,
                total_chunks,
            } => self.consolidator.consolidate(&session_id, total_chunks).await,
            JobSource::Stored { name } => self.fetch_stored(job_id, &name).await,
        }
    }

    async fn download(&self, job_id: Uuid, url: &str) -> Result<Artifact, JobError> {
        let staging = self.artifacts_dir.join(format!("{}.download", job_id));
        let fetched = match self.fetcher.fetch_to(url, &staging).await {
            Ok(fetched) => fetched,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e);
            }
        };

        let extension = fetched
            .content_type
            .as_deref()
            .and_then(extension_for_content_type)
            .unwrap_or_else(|| "bin".to_string());
        let path = self.artifact_path(job_id, &extension);
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            remove_quietly(&staging).await;
            return Err(JobError::UpstreamFetch(format!("finalising download: {}", e)));
        }

        Ok(Artifact {
            path,
            origin: ArtifactOrigin::Downloaded,
            byte_length: fetched.byte_length,
        })
    }

    async fn save_upload(
        &self,
        job_id: Uuid,
        file_name: &str,
        file_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<Artifact, JobError> {
        if bytes.is_empty() {
            return Err(JobError::BadRequest("uploaded file is empty".to_string()));
        }

        let extension = file_extension(file_name)
            .or_else(|| file_type.and_then(extension_for_content_type))
            .unwrap_or_else(|| "bin".to_string());
        let path = self.artifact_path(job_id, &extension);

        if let Err(e) = tokio::fs::write(&path, bytes).await {
            remove_quietly(&path).await;
            return Err(JobError::ConsolidationIo(format!(
                "saving uploaded file {}: {}",
                file_name, e
            )));
        }

        Ok(Artifact {
            path,
            origin: ArtifactOrigin::Uploaded,
            byte_length: bytes.len() as u64,
        })
    }

    async fn fetch_stored(&self, job_id: Uuid, name: &str) -> Result<Artifact, JobError> {
        let extension = file_extension(name).unwrap_or_else(|| "bin".to_string());
        let path = self.artifact_path(job_id, &extension);

        match self.storage.download_to(name, &path).await {
            Ok(byte_length) => Ok(Artifact {
                path,
                origin: ArtifactOrigin::Storage,
                byte_length,
            }),
            Err(e) => {
                remove_quietly(&path).await;
                Err(e)
            }
        }
    }

    fn artifact_path(&self, job_id: Uuid, extension: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{}.{}", job_id, extension))
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

/// Best-effort deletion of a transient file; failures are logged, never raised
async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::services::object_storage::UnconfiguredStorage;
    use crate::services::remote_fetch::FetchedFile;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Serves fixed bytes for any URL containing "ok", 404s otherwise
    struct FakeFetcher {
        body: Vec<u8>,
        content_type: &'static str,
    }

    #[async_trait]
    impl RemoteFetcher for FakeFetcher {
        async fn fetch_to(&self, url: &str, dest: &Path) -> Result<FetchedFile, JobError> {
            if !url.contains("ok") {
                return Err(JobError::UpstreamFetch(format!("{} answered 404", url)));
            }
            tokio::fs::write(dest, &self.body).await.unwrap();
            Ok(FetchedFile {
                content_type: Some(self.content_type.to_string()),
                byte_length: self.body.len() as u64,
            })
        }
    }

    const GRID: &str = r#"{"bpm":120.0,"beats":[0.5,1.0],"beats_confidence":[0.9,0.8],"beats_intervals":[0.5,0.5]}"#;

    struct Fixture {
        dir: tempfile::TempDir,
        coordinator: JobCoordinator,
    }

    impl Fixture {
        fn artifacts(&self) -> Vec<PathBuf> {
            std::fs::read_dir(self.dir.path().join("artifacts"))
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .collect()
        }
    }

    fn fixture(script: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&artifacts).unwrap();

        let args = vec!["-c".to_string(), script.to_string(), "engine".to_string()];
        let engine = EngineConfig {
            program: PathBuf::from("/bin/sh"),
            beat_grid_args: args.clone(),
            feature_set_args: args,
            working_dir: None,
            timeout_secs: 30,
        };
        let coordinator = JobCoordinator::new(
            ChunkStore::new(staging, 1024 * 1024),
            artifacts,
            engine,
            Arc::new(FakeFetcher {
                body: b"RIFF....WAVE".to_vec(),
                content_type: "audio/wav",
            }),
            Arc::new(UnconfiguredStorage),
        );

        Fixture { dir, coordinator }
    }

    fn chunk(session_id: &str, index: u32, total: u32, bytes: &[u8]) -> ChunkSubmission {
        ChunkSubmission {
            session_id: session_id.to_string(),
            index,
            total_chunks: total,
            file_name: Some("song.mp3".to_string()),
            file_type: Some("audio/mpeg".to_string()),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_reach_engine_in_index_order() {
        let script = format!(
            r#"[ "$(cat "$1")" = "intro-verse-outro" ] && echo '{}' || exit 3"#,
            GRID
        );
        let f = fixture(&script);

        for (index, part) in [(2, "-outro"), (0, "intro"), (1, "-verse")] {
            f.coordinator
                .submit_chunk(chunk("sess", index, 3, part.as_bytes()))
                .await
                .unwrap();
        }

        let result = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Chunked {
                    session_id: "sess".to_string(),
                    total_chunks: 3,
                },
                AnalysisKind::BeatGrid,
            )
            .await
            .unwrap();

        assert_eq!(result.as_beat_grid().unwrap().beats, vec![0.5, 1.0]);
        assert!(f.artifacts().is_empty(), "artifact not cleaned up");
        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stderr_noise_with_exit_zero_succeeds() {
        let script = format!(r#"echo "warning: resampling" >&2; echo '{}'"#, GRID);
        let f = fixture(&script);

        let result = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Upload {
                    file_name: "a.mp3".to_string(),
                    file_type: None,
                    bytes: b"ID3".to_vec(),
                },
                AnalysisKind::BeatGrid,
            )
            .await;
        assert!(result.is_ok(), "{:?}", result);
    }

    #[tokio::test]
    async fn test_exit_two_fails_and_cleans_up() {
        let f = fixture("echo 'bad file' >&2; exit 2");

        let err = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Upload {
                    file_name: "a.mp3".to_string(),
                    file_type: None,
                    bytes: b"ID3".to_vec(),
                },
                AnalysisKind::BeatGrid,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::ProcessFailed { exit_code: 2, .. }));
        assert!(f.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_stdout_is_empty_output() {
        let f = fixture("true");
        let err = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Url("http://ok.example/track".to_string()),
                AnalysisKind::FeatureSet,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::EmptyOutput));
    }

    #[tokio::test]
    async fn test_download_extension_follows_content_type() {
        let f = fixture(r#"case "$1" in *.wav) echo '{"tempo": 99}' ;; *) exit 4 ;; esac"#);

        let result = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Url("http://ok.example/track".to_string()),
                AnalysisKind::FeatureSet,
            )
            .await
            .unwrap();
        assert_eq!(result.kind(), AnalysisKind::FeatureSet);
    }

    #[tokio::test]
    async fn test_fetch_failure_short_circuits() {
        let f = fixture("echo 'engine must not run' >&2; exit 9");

        let err = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Url("http://missing.example/track".to_string()),
                AnalysisKind::BeatGrid,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::UpstreamFetch(_)));
        assert!(f.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_upload_reported() {
        let f = fixture("exit 9");
        f.coordinator.submit_chunk(chunk("gap", 0, 2, b"a")).await.unwrap();

        let err = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Chunked {
                    session_id: "gap".to_string(),
                    total_chunks: 2,
                },
                AnalysisKind::BeatGrid,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::IncompleteUpload { ref missing, .. } if missing == &vec![1]
        ));
    }

    #[tokio::test]
    async fn test_storage_source_without_storage() {
        let f = fixture("exit 9");
        let err = f
            .coordinator
            .analyze(
                Uuid::new_v4(),
                JobSource::Stored {
                    name: "song.mp3".to_string(),
                },
                AnalysisKind::FeatureSet,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UpstreamStorage(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_analyzing_kills_engine() {
        let f = Arc::new(fixture("exec sleep 10"));
        let job_id = Uuid::new_v4();

        let worker = {
            let f = f.clone();
            tokio::spawn(async move {
                f.coordinator
                    .analyze(
                        job_id,
                        JobSource::Upload {
                            file_name: "a.mp3".to_string(),
                            file_type: None,
                            bytes: b"ID3".to_vec(),
                        },
                        AnalysisKind::BeatGrid,
                    )
                    .await
            })
        };

        let mut waited = Duration::ZERO;
        let registry = f.coordinator.registry().clone();
        while registry.get(job_id).map(|job| job.state) != Some(JobState::Analyzing) {
            assert!(waited < Duration::from_secs(5), "job never reached ANALYZING");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(f.coordinator.registry().cancel(job_id));

        let result = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert!(f.coordinator.registry().is_empty());
        assert!(f.artifacts().is_empty());
    }
}
