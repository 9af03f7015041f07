//! Durable staging area for in-flight upload chunks
//!
//! Layout under the staging root:
//!
//! ```text
//! <sha256(session_id)>/
//!     session.json          manifest, written once at first chunk
//!     chunk-00000000.bin
//!     chunk-00000001.bin
//! ```
//!
//! Chunk writes go to a temp file that is renamed over the final name, so a
//! retried index replaces the previous bytes atomically (last write wins).
//!
//! Every mutation of a session directory happens under that session's lock.
//! Retiring a session renames its directory to `<hash>.trash-<uuid>` under
//! the lock; the tombstone is deleted afterwards without it, and any later
//! chunk for the same id starts a fresh session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::{ChunkMeta, ChunkRecord, UploadSession};

const MANIFEST_FILE: &str = "session.json";
const CHUNK_PREFIX: &str = "chunk-";
const CHUNK_SUFFIX: &str = ".bin";
const MAX_SESSION_ID_LEN: usize = 256;
const TOMBSTONE_MARKER: &str = ".trash-";

/// Persisted per-session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionManifest {
    session_id: String,
    total_chunks: u32,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    created_at: DateTime<Utc>,
}

/// Per-session locks; an entry lives only while someone holds or awaits it
type SessionLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

struct Inner {
    root: PathBuf,
    max_chunk_bytes: u64,
    sessions: SessionLocks,
}

/// Exclusive access to one session's staging directory
pub(crate) struct SessionLock<'a> {
    sessions: &'a SessionLocks,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let idle = sessions
            .get(&self.session_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            sessions.remove(&self.session_id);
        }
    }
}

/// Chunk staging store, cheap to clone
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<Inner>,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>, max_chunk_bytes: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                max_chunk_bytes,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Stage chunk `index` of `total_chunks` for `session_id`
    pub async fn put(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        bytes: &[u8],
    ) -> Result<ChunkRecord, JobError> {
        self.put_with_meta(session_id, index, total_chunks, bytes, ChunkMeta::default())
            .await
    }

    /// Stage a chunk, recording `meta` if this is the first chunk seen
    pub async fn put_with_meta(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        bytes: &[u8],
        meta: ChunkMeta,
    ) -> Result<ChunkRecord, JobError> {
        validate_session_id(session_id)?;
        if total_chunks == 0 {
            return Err(JobError::BadRequest("totalChunks must be positive".to_string()));
        }
        if index >= total_chunks {
            return Err(JobError::BadRequest(format!(
                "chunk index {} outside [0, {})",
                index, total_chunks
            )));
        }
        if bytes.len() as u64 > self.inner.max_chunk_bytes {
            return Err(JobError::BadRequest(format!(
                "chunk of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.inner.max_chunk_bytes
            )));
        }

        let _lock = self.lock_session(session_id).await;
        let dir = self.session_dir(session_id);
        self.ensure_manifest(session_id, &dir, total_chunks, meta).await?;

        let location = chunk_path(&dir, index);
        let temp = dir.join(format!(
            "{}{:08}{}.{}.tmp",
            CHUNK_PREFIX,
            index,
            CHUNK_SUFFIX,
            Uuid::new_v4()
        ));

        if let Err(e) = write_durably(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(staging_error(session_id, index, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &location).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(staging_error(session_id, index, e));
        }

        debug!(
            session_id = %session_id,
            index,
            total_chunks,
            bytes = bytes.len(),
            "Chunk staged"
        );

        Ok(ChunkRecord {
            session_id: session_id.to_string(),
            index,
            byte_length: bytes.len() as u64,
            storage_location: location,
        })
    }

    /// All staged chunks of a session, ascending by index
    pub async fn list_chunks(&self, session_id: &str) -> Result<Vec<ChunkRecord>, JobError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        if read_manifest(&dir).await?.is_none() {
            return Err(JobError::SessionNotFound(session_id.to_string()));
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| JobError::ConsolidationIo(format!("list {}: {}", dir.display(), e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| JobError::ConsolidationIo(format!("list {}: {}", dir.display(), e)))?
        {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_chunk_index) else {
                continue;
            };
            let metadata = entry.metadata().await.map_err(|e| {
                JobError::ConsolidationIo(format!("stat {}: {}", entry.path().display(), e))
            })?;

            records.push(ChunkRecord {
                session_id: session_id.to_string(),
                index,
                byte_length: metadata.len(),
                storage_location: entry.path(),
            });
        }

        records.sort_by_key(|record| record.index);
        Ok(records)
    }

    /// Reconstruct the session view from the staging area
    pub async fn session(&self, session_id: &str) -> Result<UploadSession, JobError> {
        validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        let manifest = read_manifest(&dir)
            .await?
            .ok_or_else(|| JobError::SessionNotFound(session_id.to_string()))?;
        let chunks = self.list_chunks(session_id).await?;

        Ok(UploadSession {
            session_id: manifest.session_id,
            total_chunks: manifest.total_chunks,
            received_chunks: chunks
                .into_iter()
                .map(|record| (record.index, record.storage_location))
                .collect::<BTreeMap<_, _>>(),
            meta: ChunkMeta {
                file_name: manifest.file_name,
                file_type: manifest.file_type,
            },
            created_at: manifest.created_at,
        })
    }

    /// Best-effort removal of every staged file of a session
    pub async fn discard(&self, session_id: &str) {
        let lock = self.lock_session(session_id).await;
        let tombstone = self.retire_locked(&lock, None).await;
        drop(lock);

        if let Some(tombstone) = tombstone {
            remove_staging_dir(&tombstone).await;
            debug!(session_id = %session_id, "Upload session discarded");
        }
    }

    /// Remove sessions whose staging directory has not changed for `max_age`.
    ///
    /// Leftover tombstones are removed too. Returns the number of sessions
    /// removed.
    pub async fn purge_stale(&self, max_age: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.inner.root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.inner.root.display(), error = %e, "Cannot scan staging area");
                return 0;
            }
        };

        let mut purged = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let is_tombstone = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.contains(TOMBSTONE_MARKER));
            if is_tombstone {
                remove_staging_dir(&path).await;
                continue;
            }
            if !is_stale(&path, max_age).await {
                continue;
            }

            match read_manifest(&path).await {
                Ok(Some(manifest)) => {
                    // Re-checked under the lock: a chunk staged since the
                    // scan keeps the session alive
                    let lock = self.lock_session(&manifest.session_id).await;
                    let tombstone = self.retire_locked(&lock, Some(max_age)).await;
                    drop(lock);

                    if let Some(tombstone) = tombstone {
                        remove_staging_dir(&tombstone).await;
                        purged += 1;
                    }
                }
                _ => {
                    remove_staging_dir(&path).await;
                    purged += 1;
                }
            }
        }

        if purged > 0 {
            info!(purged, "Purged stale upload sessions");
        }
        purged
    }

    /// Wait for exclusive access to a session's staging directory
    pub(crate) async fn lock_session(&self, session_id: &str) -> SessionLock<'_> {
        let slot = {
            let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.entry(session_id.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;

        SessionLock {
            sessions: &self.inner.sessions,
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Move a locked session's directory aside, returning the tombstone to
    /// delete. With `max_age`, only a directory unchanged for that long is
    /// retired.
    pub(crate) async fn retire_locked(
        &self,
        lock: &SessionLock<'_>,
        max_age: Option<Duration>,
    ) -> Option<PathBuf> {
        let session_id = lock.session_id.as_str();
        let dir = self.session_dir(session_id);
        if let Some(max_age) = max_age {
            if !is_stale(&dir, max_age).await {
                return None;
            }
        }

        let tombstone = self.inner.root.join(format!(
            "{}{}{}",
            session_key(session_id),
            TOMBSTONE_MARKER,
            Uuid::new_v4()
        ));
        match tokio::fs::rename(&dir, &tombstone).await {
            Ok(()) => Some(tombstone),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to retire upload session"
                );
                None
            }
        }
    }

    /// Staging directory for a session; the client id never becomes a
    /// path component
    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.inner.root.join(session_key(session_id))
    }

    /// Record the session on its first chunk, or check the declared count
    /// against the manifest. Callers hold the session lock.
    async fn ensure_manifest(
        &self,
        session_id: &str,
        dir: &Path,
        total_chunks: u32,
        meta: ChunkMeta,
    ) -> Result<(), JobError> {
        match read_manifest(dir).await? {
            Some(manifest) if manifest.total_chunks != total_chunks => {
                Err(JobError::SessionInconsistency {
                    session_id: session_id.to_string(),
                    recorded: manifest.total_chunks,
                    requested: total_chunks,
                })
            }
            Some(_) => Ok(()),
            None => {
                let manifest = SessionManifest {
                    session_id: session_id.to_string(),
                    total_chunks,
                    file_name: meta.file_name,
                    file_type: meta.file_type,
                    created_at: Utc::now(),
                };
                write_manifest(dir, &manifest)
                    .await
                    .map_err(|e| staging_error(session_id, 0, e))?;

                info!(session_id = %session_id, total_chunks, "Upload session created");
                Ok(())
            }
        }
    }
}

/// Directory name for a session: SHA-256 hex of the id
fn session_key(session_id: &str) -> String {
    format!("{:x}", Sha256::digest(session_id.as_bytes()))
}

/// Whether `dir` has not been modified for at least `max_age`
async fn is_stale(dir: &Path, max_age: Duration) -> bool {
    match tokio::fs::metadata(dir).await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default()
            >= max_age,
        Err(_) => false,
    }
}

/// Delete a retired or orphaned staging directory
pub(crate) async fn remove_staging_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
    }
}

fn validate_session_id(session_id: &str) -> Result<(), JobError> {
    if session_id.trim().is_empty() {
        return Err(JobError::BadRequest("sessionId must not be empty".to_string()));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(JobError::BadRequest(format!(
            "sessionId longer than {} bytes",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(())
}

fn chunk_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{}{:08}{}", CHUNK_PREFIX, index, CHUNK_SUFFIX))
}

fn parse_chunk_index(name: &str) -> Option<u32> {
    name.strip_prefix(CHUNK_PREFIX)?
        .strip_suffix(CHUNK_SUFFIX)?
        .parse()
        .ok()
}

fn staging_error(session_id: &str, index: u32, e: std::io::Error) -> JobError {
    JobError::ConsolidationIo(format!(
        "staging chunk {} of session {} failed: {}",
        index, session_id, e
    ))
}

async fn write_durably(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn read_manifest(dir: &Path) -> Result<Option<SessionManifest>, JobError> {
    let path = dir.join(MANIFEST_FILE);
    match tokio::fs::read(&path).await {
        Ok(content) => serde_json::from_slice(&content).map(Some).map_err(|e| {
            JobError::ConsolidationIo(format!("corrupt manifest {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(JobError::ConsolidationIo(format!(
            "read manifest {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_manifest(dir: &Path, manifest: &SessionManifest) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let content = serde_json::to_vec_pretty(manifest)?;
    let temp = dir.join(format!("{}.{}.tmp", MANIFEST_FILE, Uuid::new_v4()));
    write_durably(&temp, &content).await?;
    tokio::fs::rename(&temp, dir.join(MANIFEST_FILE)).await
}
