//! Report building
//!
//! Assembles the session report: session-level scores, a per-question
//! breakdown (fusion re-run on each question's segments), the per-segment
//! timeline, evidence and a data quality block. The report carries no
//! wall-clock data of its own, so identical inputs give identical reports.

use crate::config::EngineConfig;
use crate::error::EvaluationError;
use crate::evidence::EvidenceDetector;
use crate::fusion::FusionEngine;
use crate::types::{
    AggregatedSegment, AggregatedTimeline, Evidence, Modality, QuestionMarker, QuestionReport,
    Report, ReportProducer, ReportQuality, SegmentScore, Session,
};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Current report schema version
pub const REPORT_VERSION: &str = "sei.report.v1";

/// Builds immutable reports from an aggregated timeline
pub struct ReportBuilder {
    fusion: FusionEngine,
    evidence: EvidenceDetector,
    window_sec: f64,
    calibration_version: String,
}

impl ReportBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fusion: FusionEngine::new(config),
            evidence: EvidenceDetector::new(&config.evidence),
            window_sec: config.window_sec,
            calibration_version: config.calibration_version.clone(),
        }
    }

    /// Build the report for a session.
    ///
    /// Fails with `InsufficientSignal` when no dimension can be scored over the
    /// whole session; a question without signal only degrades its own entry.
    pub fn build(
        &self,
        session: &Session,
        timeline: &AggregatedTimeline,
    ) -> Result<Report, EvaluationError> {
        let session_scope = self.fusion.fuse_scope(&timeline.segments);
        let overall_score = session_scope.require_overall()?;

        let evidence = self.evidence.detect(timeline);

        let segments: Vec<SegmentScore> = timeline
            .segments
            .iter()
            .map(|segment| SegmentScore {
                index: segment.index,
                start_sec: segment.start_sec,
                end_sec: segment.end_sec,
                sub_scores: self.fusion.fuse_segment(segment).sub_scores,
            })
            .collect();

        let questions: Vec<QuestionReport> = session
            .questions
            .iter()
            .map(|question| self.build_question(question, &timeline.segments, &evidence))
            .collect();

        let quality = ReportQuality {
            window_sec: self.window_sec,
            segment_count: timeline.segments.len(),
            absent_modalities: timeline.absent_modalities.clone(),
            undefined_dimensions: session_scope.undefined_dimensions(),
            modality_coverage: coverage(&timeline.segments),
        };

        if !quality.undefined_dimensions.is_empty() {
            warn!(
                session_id = %session.session_id,
                undefined = ?quality.undefined_dimensions,
                "report degraded: some dimensions could not be scored"
            );
        }

        Ok(Report {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
            },
            session_id: session.session_id.clone(),
            candidate_id: session.candidate_id.clone(),
            recorded_at: session.recorded_at,
            calibration_version: self.calibration_version.clone(),
            overall_score,
            sub_scores: session_scope.sub_scores,
            questions,
            segments,
            evidence,
            quality,
        })
    }

    fn build_question(
        &self,
        question: &QuestionMarker,
        segments: &[AggregatedSegment],
        evidence: &[Evidence],
    ) -> QuestionReport {
        // Midpoints increase with the index, so membership is a contiguous range
        let first = segments.partition_point(|s| s.midpoint_sec() < question.start_sec);
        let last = segments.partition_point(|s| s.midpoint_sec() < question.end_sec);
        let scoped = &segments[first..last.max(first)];

        let scope = self.fusion.fuse_scope(scoped);
        let segment_indices: Vec<usize> = scoped.iter().map(|s| s.index).collect();
        let question_evidence: Vec<Evidence> = evidence
            .iter()
            .filter(|e| segment_indices.contains(&e.segment_index))
            .cloned()
            .collect();

        if scope.overall.is_none() {
            debug!(question_id = %question.id, "question has no scorable dimension");
        }

        QuestionReport {
            question_id: question.id.clone(),
            start_sec: question.start_sec,
            end_sec: question.end_sec,
            segment_indices,
            overall_score: scope.overall,
            missing_modalities: scope.missing_modalities(),
            sub_scores: scope.sub_scores,
            evidence: question_evidence,
        }
    }
}

/// Fraction of segments in which each modality contributed
fn coverage(segments: &[AggregatedSegment]) -> BTreeMap<Modality, f64> {
    Modality::ALL
        .into_iter()
        .map(|modality| {
            let covered = segments
                .iter()
                .filter(|s| s.signal(modality).is_some())
                .count();
            let fraction = if segments.is_empty() {
                0.0
            } else {
                covered as f64 / segments.len() as f64
            };
            (modality, fraction)
        })
        .collect()
}
