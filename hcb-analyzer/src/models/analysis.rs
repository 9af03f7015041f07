//! Analysis result shapes produced by the external engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which analysis the engine is asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Tempo plus beat timestamps
    #[default]
    BeatGrid,
    /// Opaque feature mapping
    FeatureSet,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::BeatGrid => "beat_grid",
            AnalysisKind::FeatureSet => "feature_set",
        }
    }
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Beat grid: tempo, beat timestamps (seconds), per-beat confidence and
/// inter-beat intervals. The three sequences always have equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatGrid {
    pub bpm: f64,
    pub beats: Vec<f64>,
    pub beat_confidence: Vec<f64>,
    pub beat_intervals: Vec<f64>,
}

/// Feature set passed through from the engine without interpretation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub fields: Map<String, Value>,
}

/// Decoded engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisResult {
    BeatGrid(BeatGrid),
    FeatureSet(FeatureSet),
}

impl AnalysisResult {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisResult::BeatGrid(_) => AnalysisKind::BeatGrid,
            AnalysisResult::FeatureSet(_) => AnalysisKind::FeatureSet,
        }
    }

    pub fn as_beat_grid(&self) -> Option<&BeatGrid> {
        match self {
            AnalysisResult::BeatGrid(grid) => Some(grid),
            AnalysisResult::FeatureSet(_) => None,
        }
    }
}
