//! Analysis job state machine
//!
//! RECEIVED → FETCHING | CONSOLIDATING → ANALYZING → DECODING → SUCCEEDED | FAILED
//!
//! A job may also end CANCELLED from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::AnalysisKind;

/// Job workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Request accepted, nothing done yet
    Received,
    /// Materialising a local artifact (download, upload, storage)
    Fetching,
    /// Merging staged chunks into an artifact
    Consolidating,
    /// External engine running
    Analyzing,
    /// Parsing and validating engine output
    Decoding,
    /// Result delivered
    Succeeded,
    /// Classified failure
    Failed,
    /// Cancelled by caller
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) | (_, Cancelled) => true,
            (Received, Fetching) | (Received, Consolidating) => true,
            (Fetching, Analyzing) | (Consolidating, Analyzing) => true,
            (Analyzing, Decoding) => true,
            (Decoding, Succeeded) => true,
            _ => false,
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// One analysis job (in-memory only, never persisted)
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub kind: AnalysisKind,
    /// Human-readable description of the input (URL, file name, session)
    pub source: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(job_id: Uuid, kind: AnalysisKind, source: impl Into<String>) -> Self {
        Self {
            job_id,
            kind,
            source: source.into(),
            state: JobState::Received,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state; illegal transitions are ignored and `None`
    /// is returned
    pub fn transition_to(&mut self, new_state: JobState) -> Option<StateTransition> {
        if !self.state.can_transition_to(new_state) {
            return None;
        }

        let transition = StateTransition {
            job_id: self.job_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        Some(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Where an artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    Downloaded,
    Uploaded,
    Consolidated,
    Storage,
}

/// Local audio file handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub origin: ArtifactOrigin,
    pub byte_length: u64,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = AnalysisJob::new(Uuid::new_v4(), AnalysisKind::BeatGrid, "test");
        for state in [
            JobState::Consolidating,
            JobState::Analyzing,
            JobState::Decoding,
            JobState::Succeeded,
        ] {
            assert!(job.transition_to(state).is_some(), "{:?} rejected", state);
        }
        assert!(job.is_terminal());
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = AnalysisJob::new(Uuid::new_v4(), AnalysisKind::BeatGrid, "test");
        job.transition_to(JobState::Failed).unwrap();
        assert!(job.transition_to(JobState::Fetching).is_none());
        assert!(job.transition_to(JobState::Cancelled).is_none());
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut job = AnalysisJob::new(Uuid::new_v4(), AnalysisKind::FeatureSet, "test");
        assert!(job.transition_to(JobState::Analyzing).is_none());
        job.transition_to(JobState::Fetching).unwrap();
        assert!(job.transition_to(JobState::Succeeded).is_none());
    }
}
