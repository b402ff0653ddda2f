//! Fusion and scoring
//!
//! Combines aggregated modality signals into calibrated per-dimension
//! sub-scores and an overall score. Configured modality weights are
//! renormalized over the modalities that actually contributed, so a candidate
//! is never scored against a signal that was lost. A dimension with no
//! contributing modality is undefined and stays out of the overall score.

use crate::config::{DimensionConfig, EngineConfig};
use crate::error::EvaluationError;
use crate::types::{AggregatedSegment, Modality, SubScore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Renormalized fusion of one dimension over one segment
#[derive(Debug, Clone, PartialEq)]
struct SegmentFusion {
    /// Weighted sum of smoothed values, in [0, 1]
    raw: f64,
    weights: BTreeMap<Modality, f64>,
    /// Sum of used weight times effective samples
    reliability: f64,
}

/// Sub-scores and overall score for a scope (session, question or segment)
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeScore {
    pub sub_scores: Vec<SubScore>,
    /// Dimension-weighted mean of defined sub-scores; `None` if none is defined
    pub overall: Option<f64>,
}

impl ScopeScore {
    /// Names of dimensions that could not be scored
    pub fn undefined_dimensions(&self) -> Vec<String> {
        self.sub_scores
            .iter()
            .filter(|s| !s.is_defined())
            .map(|s| s.dimension.clone())
            .collect()
    }

    /// Configured modalities missing from at least one sub-score, in modality order
    pub fn missing_modalities(&self) -> Vec<Modality> {
        self.sub_scores
            .iter()
            .flat_map(|s| s.missing_modalities.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The overall score, or `InsufficientSignal` when no dimension is defined
    pub fn require_overall(&self) -> Result<f64, EvaluationError> {
        self.overall.ok_or_else(|| EvaluationError::InsufficientSignal {
            missing_modalities: self.missing_modalities(),
        })
    }
}

/// Weighted multimodal scoring model
pub struct FusionEngine {
    dimensions: Vec<DimensionConfig>,
}

impl FusionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dimensions: config.dimensions.clone(),
        }
    }

    /// Score a single segment
    pub fn fuse_segment(&self, segment: &AggregatedSegment) -> ScopeScore {
        self.fuse_scope(std::slice::from_ref(segment))
    }

    /// Score a contiguous range of segments as one scope.
    ///
    /// Per-segment raw values are combined by reliability (used weight times
    /// effective samples), then calibrated once for the whole scope.
    pub fn fuse_scope(&self, segments: &[AggregatedSegment]) -> ScopeScore {
        let sub_scores: Vec<SubScore> = self
            .dimensions
            .iter()
            .map(|dimension| score_dimension(dimension, segments))
            .collect();

        let overall = overall_score(&self.dimensions, &sub_scores);

        debug!(
            segments = segments.len(),
            defined = sub_scores.iter().filter(|s| s.is_defined()).count(),
            overall = ?overall,
            "scope fused"
        );

        ScopeScore {
            sub_scores,
            overall,
        }
    }
}

/// Renormalize a dimension's weights over the modalities present in `segment`
fn fuse_dimension_segment(
    dimension: &DimensionConfig,
    segment: &AggregatedSegment,
) -> Option<SegmentFusion> {
    let present: Vec<(Modality, f64, f64, f64)> = dimension
        .modalities
        .iter()
        .filter_map(|mw| {
            let signal = segment.signal(mw.modality)?;
            let value = signal.value?;
            Some((mw.modality, mw.weight, value, signal.effective_samples))
        })
        .collect();

    let weight_sum: f64 = present.iter().map(|(_, w, _, _)| w).sum();
    if present.is_empty() || weight_sum <= 0.0 {
        return None;
    }

    let mut raw = 0.0;
    let mut reliability = 0.0;
    let mut weights = BTreeMap::new();
    for (modality, weight, value, effective_samples) in present {
        let used = weight / weight_sum;
        raw += used * value;
        reliability += used * effective_samples;
        weights.insert(modality, used);
    }

    Some(SegmentFusion {
        raw: raw.clamp(0.0, 1.0),
        weights,
        reliability,
    })
}

fn score_dimension(dimension: &DimensionConfig, segments: &[AggregatedSegment]) -> SubScore {
    let fused: Vec<SegmentFusion> = segments
        .iter()
        .filter_map(|segment| fuse_dimension_segment(dimension, segment))
        .filter(|f| f.reliability > 0.0)
        .collect();

    let contributed: BTreeSet<Modality> = fused
        .iter()
        .flat_map(|f| f.weights.keys().copied())
        .collect();
    let missing_modalities: Vec<Modality> = dimension
        .modalities
        .iter()
        .map(|mw| mw.modality)
        .filter(|m| !contributed.contains(m))
        .collect();

    let total_reliability: f64 = fused.iter().map(|f| f.reliability).sum();
    if fused.is_empty() || total_reliability <= 0.0 {
        return SubScore {
            dimension: dimension.name.clone(),
            score: None,
            weights_used: BTreeMap::new(),
            missing_modalities,
        };
    }

    let raw = fused.iter().map(|f| f.reliability * f.raw).sum::<f64>() / total_reliability;

    let mut weights_used: BTreeMap<Modality, f64> = BTreeMap::new();
    for f in &fused {
        for (modality, weight) in &f.weights {
            *weights_used.entry(*modality).or_default() += f.reliability * weight;
        }
    }
    for weight in weights_used.values_mut() {
        *weight /= total_reliability;
    }

    SubScore {
        dimension: dimension.name.clone(),
        score: Some(dimension.calibration.apply(raw.clamp(0.0, 1.0) * 100.0)),
        weights_used,
        missing_modalities,
    }
}

fn overall_score(dimensions: &[DimensionConfig], sub_scores: &[SubScore]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for (dimension, sub_score) in dimensions.iter().zip(sub_scores) {
        if let Some(score) = sub_score.score {
            weighted += dimension.weight * score;
            weight_sum += dimension.weight;
        }
    }

    if weight_sum <= 0.0 {
        return None;
    }
    Some((weighted / weight_sum).clamp(0.0, 100.0))
}
