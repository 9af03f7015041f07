//! Engine stdout decoding and validation
//!
//! The engine writes exactly one JSON document to stdout. Beat grids are
//! checked field by field; feature sets only have to be a JSON object and
//! are passed through untouched. Unknown fields are ignored.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{excerpt, JobError, PAYLOAD_EXCERPT_LIMIT};
use crate::models::{AnalysisKind, AnalysisResult, BeatGrid, FeatureSet};

const BPM: &str = "bpm";
const BEATS: &str = "beats";
const BEAT_CONFIDENCE: &[&str] = &["beat_confidence", "beats_confidence"];
const BEAT_INTERVALS: &[&str] = &["beat_intervals", "beats_intervals"];

/// Decode engine stdout into the result shape for `kind`
pub fn decode(stdout: &[u8], kind: AnalysisKind) -> Result<AnalysisResult, JobError> {
    let document: Value =
        serde_json::from_slice(stdout).map_err(|e| JobError::MalformedOutput {
            reason: e.to_string(),
            excerpt: excerpt(stdout, PAYLOAD_EXCERPT_LIMIT),
        })?;

    let Value::Object(fields) = document else {
        return Err(violation("$", "expected a JSON object"));
    };

    let result = match kind {
        AnalysisKind::BeatGrid => AnalysisResult::BeatGrid(decode_beat_grid(&fields)?),
        AnalysisKind::FeatureSet => AnalysisResult::FeatureSet(FeatureSet { fields }),
    };

    debug!(kind = %kind, bytes = stdout.len(), "Engine output decoded");
    Ok(result)
}

fn decode_beat_grid(fields: &Map<String, Value>) -> Result<BeatGrid, JobError> {
    let bpm = match fields.get(BPM) {
        None => return Err(violation(BPM, "missing")),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| violation(BPM, "expected a number"))?,
    };
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(violation(BPM, "must be a positive finite number"));
    }

    let beats = number_array(fields, &[BEATS])?;
    let beat_confidence = number_array(fields, BEAT_CONFIDENCE)?;
    let beat_intervals = number_array(fields, BEAT_INTERVALS)?;

    for (name, values) in [
        (BEAT_CONFIDENCE[0], &beat_confidence),
        (BEAT_INTERVALS[0], &beat_intervals),
    ] {
        if values.len() != beats.len() {
            return Err(violation(
                name,
                &format!(
                    "has {} entries but beats has {}",
                    values.len(),
                    beats.len()
                ),
            ));
        }
    }

    if let Some(i) = beats.windows(2).position(|pair| pair[1] < pair[0]) {
        return Err(violation(
            &format!("{}[{}]", BEATS, i + 1),
            "beat timestamps must be non-decreasing",
        ));
    }

    if let Some(i) = beat_confidence
        .iter()
        .position(|c| !(0.0..=1.0).contains(c))
    {
        return Err(violation(
            &format!("{}[{}]", BEAT_CONFIDENCE[0], i),
            "confidence must be within [0, 1]",
        ));
    }

    Ok(BeatGrid {
        bpm,
        beats,
        beat_confidence,
        beat_intervals,
    })
}

/// Array of finite numbers under the first present alias; errors name the
/// canonical (first) alias
fn number_array(fields: &Map<String, Value>, aliases: &[&str]) -> Result<Vec<f64>, JobError> {
    let name = aliases[0];
    let value = aliases
        .iter()
        .find_map(|alias| fields.get(*alias))
        .ok_or_else(|| violation(name, "missing"))?;
    let items = value
        .as_array()
        .ok_or_else(|| violation(name, "expected an array of numbers"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_f64()
                .filter(|n| n.is_finite())
                .ok_or_else(|| violation(&format!("{}[{}]", name, i), "expected a finite number"))
        })
        .collect()
}

fn violation(field: &str, reason: &str) -> JobError {
    JobError::SchemaViolation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
