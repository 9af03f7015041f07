//! Merges the staged chunks of an upload session into one artifact
//!
//! Output order is chunk index order, never arrival order. The merge streams
//! chunk by chunk into a `.partial` file that is renamed into place only
//! after a successful fsync.

use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::{Artifact, ArtifactOrigin, ChunkRecord};
use crate::services::chunk_store::{remove_staging_dir, ChunkStore};
use crate::utils::file_extension;

/// Chunk consolidator
#[derive(Clone)]
pub struct Consolidator {
    store: ChunkStore,
    artifacts_dir: PathBuf,
}

impl Consolidator {
    pub fn new(store: ChunkStore, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Merge all `total_chunks` chunks of `session_id` into one file.
    ///
    /// The session stays locked for the whole merge. On success it is
    /// retired before returning and its chunks are deleted in the
    /// background, so a later chunk with the same id opens a new session.
    /// On `IncompleteUpload` or `ConsolidationIo` the chunks stay, so the
    /// caller can fill gaps or retry.
    pub async fn consolidate(
        &self,
        session_id: &str,
        total_chunks: u32,
    ) -> Result<Artifact, JobError> {
        let lock = self.store.lock_session(session_id).await;
        let session = self.store.session(session_id).await?;
        if session.total_chunks != total_chunks {
            return Err(JobError::SessionInconsistency {
                session_id: session_id.to_string(),
                recorded: session.total_chunks,
                requested: total_chunks,
            });
        }

        let missing = session.missing_indices();
        if !missing.is_empty() {
            return Err(JobError::IncompleteUpload {
                session_id: session_id.to_string(),
                missing,
            });
        }

        let chunks = self.store.list_chunks(session_id).await?;
        let extension = session
            .meta
            .file_name
            .as_deref()
            .and_then(file_extension)
            .unwrap_or_else(|| "bin".to_string());
        let target = self
            .artifacts_dir
            .join(format!("{}.{}", Uuid::new_v4(), extension));
        let partial = target.with_extension(format!("{}.partial", extension));

        let byte_length = match merge(&chunks, &partial).await {
            Ok(written) => written,
            Err(e) => {
                discard_partial(&partial).await;
                return Err(JobError::ConsolidationIo(format!(
                    "merging session {}: {}",
                    session_id, e
                )));
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            discard_partial(&partial).await;
            return Err(JobError::ConsolidationIo(format!(
                "finalising session {}: {}",
                session_id, e
            )));
        }

        info!(
            session_id = %session_id,
            total_chunks,
            byte_length,
            artifact = %target.display(),
            "Upload session consolidated"
        );

        let tombstone = self.store.retire_locked(&lock, None).await;
        drop(lock);
        if let Some(tombstone) = tombstone {
            tokio::spawn(async move { remove_staging_dir(&tombstone).await });
        }

        Ok(Artifact {
            path: target,
            origin: ArtifactOrigin::Consolidated,
            byte_length,
        })
    }
}

/// Append every chunk, in the given order, to `output`
async fn merge(chunks: &[ChunkRecord], output: &Path) -> std::io::Result<u64> {
    let file = File::create(output).await?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    for chunk in chunks {
        let mut reader = File::open(&chunk.storage_location).await?;
        written += tokio::io::copy(&mut reader, &mut writer).await?;
    }

    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    Ok(written)
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
}
