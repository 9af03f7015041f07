//! Data models for the analysis service

pub mod analysis;
pub mod job;
pub mod upload;

pub use analysis::{AnalysisKind, AnalysisResult, BeatGrid, FeatureSet};
pub use job::{AnalysisJob, Artifact, ArtifactOrigin, JobState, StateTransition};
pub use upload::{ChunkMeta, ChunkRecord, UploadSession};
