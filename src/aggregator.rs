//! Temporal aggregation
//!
//! Smooths each modality across consecutive segments with a
//! confidence-weighted exponential moving average. Alongside the smoothed
//! value every segment carries an effective sample size (Kish), which the
//! fusion stage uses as the modality's reliability weight.
//!
//! Segments whose measurement is absent or below `min_confidence` are
//! rejected: they report no value and zero effective samples, but the
//! accumulated history is kept so the next accepted segment still benefits
//! from it.

use crate::config::AggregationConfig;
use crate::types::{
    AggregatedSegment, AggregatedSignal, AggregatedTimeline, Measurement, Modality, Segment,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Running sums of one modality's weighted moving average
#[derive(Debug, Clone, Copy, Default)]
struct SmoothingState {
    /// Decayed sum of confidence * value
    weighted_sum: f64,
    /// Decayed sum of confidence
    weight_sum: f64,
    /// Decayed sum of squared confidence
    weight_sq_sum: f64,
}

impl SmoothingState {
    fn decay(&mut self, decay: f64) {
        self.weighted_sum *= decay;
        self.weight_sum *= decay;
        self.weight_sq_sum *= decay * decay;
    }

    fn accept(&mut self, value: f64, confidence: f64) {
        self.weighted_sum += confidence * value;
        self.weight_sum += confidence;
        self.weight_sq_sum += confidence * confidence;
    }

    fn value(&self) -> f64 {
        (self.weighted_sum / self.weight_sum).clamp(0.0, 1.0)
    }

    fn effective_samples(&self) -> f64 {
        if self.weight_sq_sum <= 0.0 {
            return 0.0;
        }
        self.weight_sum * self.weight_sum / self.weight_sq_sum
    }
}

/// Confidence-weighted EWMA over the segment timeline
pub struct TemporalAggregator {
    decay: f64,
    min_confidence: f64,
}

impl TemporalAggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            decay: config.decay,
            min_confidence: config.min_confidence,
        }
    }

    /// Smooth every modality across `segments` (which must be in timeline order).
    ///
    /// Pure function of its input: calling it twice on the same segments
    /// yields identical output.
    pub fn aggregate(&self, segments: &[Segment]) -> AggregatedTimeline {
        let mut states: BTreeMap<Modality, SmoothingState> = Modality::ALL
            .iter()
            .map(|m| (*m, SmoothingState::default()))
            .collect();
        let mut accepted: BTreeMap<Modality, usize> = BTreeMap::new();

        let aggregated: Vec<AggregatedSegment> = segments
            .iter()
            .map(|segment| {
                let mut signals = BTreeMap::new();
                for modality in Modality::ALL {
                    let state = states.entry(modality).or_default();
                    state.decay(self.decay);

                    let signal = match segment.measurement(modality) {
                        Measurement::Present {
                            value, confidence, ..
                        } if *confidence >= self.min_confidence && *confidence > 0.0 => {
                            state.accept(*value, *confidence);
                            *accepted.entry(modality).or_default() += 1;
                            AggregatedSignal {
                                modality,
                                value: Some(state.value()),
                                effective_samples: state.effective_samples(),
                            }
                        }
                        _ => AggregatedSignal::absent(modality),
                    };
                    signals.insert(modality, signal);
                }

                AggregatedSegment {
                    index: segment.index,
                    start_sec: segment.start_sec,
                    end_sec: segment.end_sec,
                    signals,
                }
            })
            .collect();

        let absent_modalities: Vec<Modality> = Modality::ALL
            .into_iter()
            .filter(|m| !accepted.contains_key(m))
            .collect();

        debug!(
            segments = aggregated.len(),
            absent = ?absent_modalities,
            decay = self.decay,
            "temporal aggregation complete"
        );

        AggregatedTimeline {
            segments: aggregated,
            absent_modalities,
        }
    }
}
