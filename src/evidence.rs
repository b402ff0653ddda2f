//! Self-relative evidence
//!
//! Flags segments where a modality's smoothed signal departs from the
//! candidate's own session baseline by more than `outlier_sigma` standard
//! deviations. Candidates are never compared with each other here.

use crate::config::EvidenceConfig;
use crate::types::{AggregatedTimeline, Deviation, Evidence, Modality};
use std::collections::BTreeMap;
use tracing::debug;

/// Spreads at or below this are treated as a constant signal
pub const MIN_DEVIATION_SPREAD: f64 = 1e-9;

/// Session-level statistics of one modality
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModalityBaseline {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Segments that contributed
    pub samples: usize,
}

impl ModalityBaseline {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            samples: values.len(),
        })
    }

    /// Standardized distance from the mean, `None` for a constant signal
    fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev <= MIN_DEVIATION_SPREAD {
            return None;
        }
        Some((value - self.mean) / self.std_dev)
    }
}

/// Outlier detector over an aggregated timeline
pub struct EvidenceDetector {
    outlier_sigma: f64,
}

impl EvidenceDetector {
    pub fn new(config: &EvidenceConfig) -> Self {
        Self {
            outlier_sigma: config.outlier_sigma,
        }
    }

    /// Per-modality baselines over every segment where the modality contributed
    pub fn baselines(&self, timeline: &AggregatedTimeline) -> BTreeMap<Modality, ModalityBaseline> {
        Modality::ALL
            .into_iter()
            .filter_map(|modality| {
                let values: Vec<f64> = timeline
                    .segments
                    .iter()
                    .filter_map(|s| s.signal(modality).and_then(|signal| signal.value))
                    .collect();
                ModalityBaseline::from_values(&values).map(|b| (modality, b))
            })
            .collect()
    }

    /// Evidence ordered by segment index, then modality
    pub fn detect(&self, timeline: &AggregatedTimeline) -> Vec<Evidence> {
        let baselines = self.baselines(timeline);
        let mut evidence = Vec::new();

        for segment in &timeline.segments {
            for (modality, baseline) in &baselines {
                let Some(value) = segment.signal(*modality).and_then(|s| s.value) else {
                    continue;
                };
                let Some(z_score) = baseline.z_score(value) else {
                    continue;
                };
                if z_score.abs() <= self.outlier_sigma {
                    continue;
                }

                evidence.push(Evidence {
                    segment_index: segment.index,
                    start_sec: segment.start_sec,
                    end_sec: segment.end_sec,
                    modality: *modality,
                    value,
                    session_mean: baseline.mean,
                    z_score,
                    deviation: if z_score > 0.0 {
                        Deviation::Above
                    } else {
                        Deviation::Below
                    },
                });
            }
        }

        debug!(flagged = evidence.len(), sigma = self.outlier_sigma, "evidence detected");
        evidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregatedSegment, AggregatedSignal};

    fn timeline(modality: Modality, values: &[Option<f64>]) -> AggregatedTimeline {
        let segments = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let mut signals: BTreeMap<Modality, AggregatedSignal> = Modality::ALL
                    .iter()
                    .map(|m| (*m, AggregatedSignal::absent(*m)))
                    .collect();
                if let Some(v) = value {
                    signals.insert(
                        modality,
                        AggregatedSignal {
                            modality,
                            value: Some(*v),
                            effective_samples: 1.0,
                        },
                    );
                }
                AggregatedSegment {
                    index,
                    start_sec: index as f64,
                    end_sec: index as f64 + 1.0,
                    signals,
                }
            })
            .collect();
        AggregatedTimeline {
            segments,
            absent_modalities: vec![],
        }
    }

    fn detector(sigma: f64) -> EvidenceDetector {
        EvidenceDetector::new(&EvidenceConfig {
            outlier_sigma: sigma,
        })
    }

    #[test]
    fn test_constant_signal_never_flagged() {
        let values = vec![Some(0.8); 12];
        let evidence = detector(2.0).detect(&timeline(Modality::Face, &values));
        assert!(evidence.is_empty());
    }

    #[test]
    fn test_drop_in_gaze_flagged_below() {
        let mut values = vec![Some(0.7); 10];
        values[6] = Some(0.1);
        let evidence = detector(2.0).detect(&timeline(Modality::Gaze, &values));

        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].segment_index, 6);
        assert_eq!(evidence[0].modality, Modality::Gaze);
        assert_eq!(evidence[0].deviation, Deviation::Below);
        assert!(evidence[0].z_score < -2.0);
    }

    #[test]
    fn test_absent_segments_ignored_for_baseline() {
        let values = vec![Some(0.5), None, Some(0.5), None, Some(0.5)];
        let det = detector(2.0);
        let tl = timeline(Modality::Voice, &values);

        let baselines = det.baselines(&tl);
        assert_eq!(baselines[&Modality::Voice].samples, 3);
        assert!(!baselines.contains_key(&Modality::Face));
        assert!(det.detect(&tl).is_empty());
    }

    #[test]
    fn test_threshold_controls_sensitivity() {
        let values: Vec<Option<f64>> = [0.5, 0.5, 0.5, 0.5, 0.9]
            .iter()
            .map(|v| Some(*v))
            .collect();
        let tl = timeline(Modality::Face, &values);

        // z of the last segment is exactly 2.0
        assert!(detector(2.5).detect(&tl).is_empty());
        let flagged = detector(1.5).detect(&tl);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].deviation, Deviation::Above);
    }
}
