//! Core types for the SEI scoring pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: sessions and observations, synchronized segments, aggregated
//! signals, sub-scores and the final report.

use crate::error::EvaluationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Non-verbal signal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Gaze,
    Voice,
}

impl Modality {
    /// All modalities in canonical order
    pub const ALL: [Modality; 3] = [Modality::Face, Modality::Gaze, Modality::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Gaze => "gaze",
            Modality::Voice => "voice",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Question boundary within a session recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMarker {
    /// Question identifier (e.g. "q1")
    pub id: String,
    /// Start offset in seconds
    pub start_sec: f64,
    /// End offset in seconds (exclusive)
    pub end_sec: f64,
}

/// One interview recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub candidate_id: String,
    /// Total recording length in seconds
    pub duration_sec: f64,
    #[serde(default)]
    pub questions: Vec<QuestionMarker>,
    /// When the recording was made, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session with a freshly generated id
    pub fn new(candidate_id: impl Into<String>, duration_sec: f64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            candidate_id: candidate_id.into(),
            duration_sec,
            questions: Vec::new(),
            recorded_at: None,
        }
    }

    /// Add a question marker
    pub fn with_question(mut self, id: impl Into<String>, start_sec: f64, end_sec: f64) -> Self {
        self.questions.push(QuestionMarker {
            id: id.into(),
            start_sec,
            end_sec,
        });
        self
    }

    /// Check structural validity before any processing
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.session_id.trim().is_empty() {
            return Err(EvaluationError::InvalidSession(
                "session_id must not be empty".to_string(),
            ));
        }
        if !self.duration_sec.is_finite() || self.duration_sec <= 0.0 {
            return Err(EvaluationError::InvalidSession(format!(
                "duration_sec must be a positive number, got {}",
                self.duration_sec
            )));
        }

        let mut seen = HashSet::new();
        for question in &self.questions {
            if !seen.insert(question.id.as_str()) {
                return Err(EvaluationError::InvalidSession(format!(
                    "duplicate question id '{}'",
                    question.id
                )));
            }
            if !question.start_sec.is_finite()
                || !question.end_sec.is_finite()
                || question.start_sec >= question.end_sec
            {
                return Err(EvaluationError::InvalidSession(format!(
                    "question '{}' must have start_sec < end_sec",
                    question.id
                )));
            }
            if question.start_sec < 0.0 || question.end_sec > self.duration_sec {
                return Err(EvaluationError::InvalidSession(format!(
                    "question '{}' lies outside the recording [0, {}]",
                    question.id, self.duration_sec
                )));
            }
        }

        Ok(())
    }
}

/// One modality's observation.
///
/// Low-quality or missing signal is `Absent`, never a zero-valued `Present`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Measurement {
    Present {
        /// Projection of the feature vector onto [0, 1]
        value: f64,
        /// Detector confidence in (0, 1]
        confidence: f64,
        /// Normalized feature vector
        #[serde(default)]
        features: Vec<f64>,
    },
    Absent,
}

impl Measurement {
    /// Build a present measurement, collapsing unusable input to `Absent`
    pub fn present(value: f64, confidence: f64, features: Vec<f64>) -> Self {
        if !value.is_finite() || !confidence.is_finite() || confidence <= 0.0 {
            return Measurement::Absent;
        }
        Measurement::Present {
            value: value.clamp(0.0, 1.0),
            confidence: confidence.min(1.0),
            features,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Measurement::Present { .. })
    }

    /// Value in [0, 1], confidence in (0, 1] and finite features.
    /// `Absent` always qualifies.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Measurement::Present {
                value,
                confidence,
                features,
            } => {
                (0.0..=1.0).contains(value)
                    && *confidence > 0.0
                    && *confidence <= 1.0
                    && features.iter().all(|f| f.is_finite())
            }
            Measurement::Absent => true,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Measurement::Present { value, .. } => Some(*value),
            Measurement::Absent => None,
        }
    }

    /// Confidence, 0 when absent
    pub fn confidence(&self) -> f64 {
        match self {
            Measurement::Present { confidence, .. } => *confidence,
            Measurement::Absent => 0.0,
        }
    }
}

/// A timestamped measurement from one modality stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub modality: Modality,
    /// Offset from session start in seconds
    pub timestamp_sec: f64,
    pub measurement: Measurement,
}

/// Fixed-width window on the common session timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    /// One measurement per modality (absent where nothing usable was observed)
    pub measurements: BTreeMap<Modality, Measurement>,
    /// Raw observations merged per modality
    pub sample_counts: BTreeMap<Modality, u32>,
}

static ABSENT: Measurement = Measurement::Absent;

impl Segment {
    pub fn measurement(&self, modality: Modality) -> &Measurement {
        self.measurements.get(&modality).unwrap_or(&ABSENT)
    }
}

/// Smoothed per-modality signal for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub modality: Modality,
    /// Smoothed value in [0, 1]; `None` when the modality contributed nothing
    pub value: Option<f64>,
    /// Reliability weight; 0 exactly when `value` is `None`
    pub effective_samples: f64,
}

impl AggregatedSignal {
    pub fn absent(modality: Modality) -> Self {
        Self {
            modality,
            value: None,
            effective_samples: 0.0,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some() && self.effective_samples > 0.0
    }
}

/// All aggregated signals for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSegment {
    pub index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub signals: BTreeMap<Modality, AggregatedSignal>,
}

impl AggregatedSegment {
    pub fn signal(&self, modality: Modality) -> Option<&AggregatedSignal> {
        self.signals.get(&modality).filter(|s| s.is_present())
    }

    pub fn midpoint_sec(&self) -> f64 {
        (self.start_sec + self.end_sec) / 2.0
    }
}

/// Output of temporal aggregation for a whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTimeline {
    pub segments: Vec<AggregatedSegment>,
    /// Modalities with zero effective samples across the whole session
    pub absent_modalities: Vec<Modality>,
}

/// Score for one evaluation dimension within a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub dimension: String,
    /// Calibrated score in [0, 100]; `None` when every configured modality was absent
    pub score: Option<f64>,
    /// Weights actually used after renormalization (sum to 1 when defined)
    pub weights_used: BTreeMap<Modality, f64>,
    /// Configured modalities that contributed nothing in this scope
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_modalities: Vec<Modality>,
}

impl SubScore {
    pub fn is_defined(&self) -> bool {
        self.score.is_some()
    }
}

/// Direction of an outlier relative to the session mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deviation {
    Above,
    Below,
}

/// A segment flagged for human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub segment_index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub modality: Modality,
    pub value: f64,
    pub session_mean: f64,
    pub z_score: f64,
    pub deviation: Deviation,
}

/// Per-segment scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentScore {
    pub index: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub sub_scores: Vec<SubScore>,
}

/// Scores scoped to a single question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionReport {
    pub question_id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub segment_indices: Vec<usize>,
    /// `None` when no dimension could be scored within the question
    pub overall_score: Option<f64>,
    pub sub_scores: Vec<SubScore>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_modalities: Vec<Modality>,
    pub evidence: Vec<Evidence>,
}

/// Report producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
}

/// Data quality summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportQuality {
    pub window_sec: f64,
    pub segment_count: usize,
    pub absent_modalities: Vec<Modality>,
    pub undefined_dimensions: Vec<String>,
    /// Fraction of segments where each modality contributed (0-1)
    pub modality_coverage: BTreeMap<Modality, f64>,
}

/// Final evaluation of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_version: String,
    pub producer: ReportProducer,
    pub session_id: String,
    pub candidate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    pub calibration_version: String,
    pub overall_score: f64,
    pub sub_scores: Vec<SubScore>,
    pub questions: Vec<QuestionReport>,
    pub segments: Vec<SegmentScore>,
    pub evidence: Vec<Evidence>,
    pub quality: ReportQuality,
}

impl Report {
    /// Look up a session-level sub-score by dimension name
    pub fn sub_score(&self, dimension: &str) -> Option<&SubScore> {
        self.sub_scores.iter().find(|s| s.dimension == dimension)
    }

    pub fn to_json(&self) -> Result<String, EvaluationError> {
        serde_json::to_string(self).map_err(EvaluationError::JsonError)
    }

    pub fn to_json_pretty(&self) -> Result<String, EvaluationError> {
        serde_json::to_string_pretty(self).map_err(EvaluationError::JsonError)
    }
}

/// Already-measured modality streams for a session (offline scoring input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecording {
    pub session: Session,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_present_collapses_unusable() {
        assert_eq!(Measurement::present(0.5, 0.0, vec![]), Measurement::Absent);
        assert_eq!(Measurement::present(f64::NAN, 0.8, vec![]), Measurement::Absent);
        assert_eq!(Measurement::present(0.5, f64::INFINITY, vec![]), Measurement::Absent);

        let m = Measurement::present(1.4, 0.7, vec![1.0]);
        assert_eq!(m.value(), Some(1.0));
        assert_eq!(m.confidence(), 0.7);
    }

    #[test]
    fn test_measurement_well_formed() {
        let present = |value, confidence| Measurement::Present {
            value,
            confidence,
            features: vec![],
        };
        assert!(present(0.0, 1.0).is_well_formed());
        assert!(present(1.0, 0.01).is_well_formed());
        assert!(Measurement::Absent.is_well_formed());

        assert!(!present(7.0, 0.9).is_well_formed());
        assert!(!present(-0.1, 0.9).is_well_formed());
        assert!(!present(0.5, 50.0).is_well_formed());
        assert!(!present(0.5, 0.0).is_well_formed());
        assert!(!present(f64::NAN, 0.5).is_well_formed());
        assert!(!Measurement::Present {
            value: 0.5,
            confidence: 0.5,
            features: vec![f64::INFINITY],
        }
        .is_well_formed());
    }

    #[test]
    fn test_measurement_serde_tagging() {
        let json = r#"{"status":"present","value":0.8,"confidence":0.9}"#;
        let m: Measurement = serde_json::from_str(json).unwrap();
        assert_eq!(m.value(), Some(0.8));

        let absent: Measurement = serde_json::from_str(r#"{"status":"absent"}"#).unwrap();
        assert!(!absent.is_present());
        assert_eq!(absent.confidence(), 0.0);
    }

    #[test]
    fn test_session_validation() {
        let session = Session::new("cand-1", 60.0)
            .with_question("q1", 0.0, 30.0)
            .with_question("q2", 30.0, 60.0);
        assert!(session.validate().is_ok());
        assert!(!session.session_id.is_empty());

        let bad_duration = Session::new("cand-1", 0.0);
        assert!(matches!(
            bad_duration.validate(),
            Err(EvaluationError::InvalidSession(_))
        ));

        let outside = Session::new("cand-1", 60.0).with_question("q1", 50.0, 70.0);
        assert!(outside.validate().is_err());

        let inverted = Session::new("cand-1", 60.0).with_question("q1", 20.0, 10.0);
        assert!(inverted.validate().is_err());

        let duplicate = Session::new("cand-1", 60.0)
            .with_question("q1", 0.0, 10.0)
            .with_question("q1", 10.0, 20.0);
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_modality_display() {
        assert_eq!(Modality::Gaze.to_string(), "gaze");
        let json = serde_json::to_string(&Modality::Voice).unwrap();
        assert_eq!(json, "\"voice\"");
    }
}
