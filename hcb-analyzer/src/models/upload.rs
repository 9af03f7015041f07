//! Chunked upload session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Descriptive metadata sent alongside each chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
}

/// One durably staged chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub session_id: String,
    pub index: u32,
    pub byte_length: u64,
    pub storage_location: PathBuf,
}

/// Upload session as reconstructed from the staging area
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub session_id: String,
    /// Fixed at first chunk
    pub total_chunks: u32,
    /// Chunk index → storage location
    pub received_chunks: BTreeMap<u32, PathBuf>,
    pub meta: ChunkMeta,
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Indices in `[0, total_chunks)` not yet received, ascending
    pub fn missing_indices(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !self.received_chunks.contains_key(index))
            .collect()
    }

    /// Complete iff every index in `[0, total_chunks)` is present
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks as usize
            && self.missing_indices().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32, received: &[u32]) -> UploadSession {
        UploadSession {
            session_id: "abc".to_string(),
            total_chunks: total,
            received_chunks: received
                .iter()
                .map(|i| (*i, PathBuf::from(format!("chunk-{}", i))))
                .collect(),
            meta: ChunkMeta::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_complete_session() {
        let s = session(3, &[2, 0, 1]);
        assert!(s.is_complete());
        assert!(s.missing_indices().is_empty());
    }

    #[test]
    fn test_gap_reported() {
        let s = session(4, &[0, 3]);
        assert!(!s.is_complete());
        assert_eq!(s.missing_indices(), vec![1, 2]);
    }
}
