//! Segment synchronization
//!
//! Aligns the per-modality observation streams (each at its own rate) onto one
//! timeline of fixed-width windows covering `[0, duration)` without gaps or
//! overlaps. Within a window each modality is reduced to a single measurement
//! by confidence-weighted averaging.

use crate::error::EvaluationError;
use crate::types::{Measurement, Modality, Observation, Segment, Session};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Remainders shorter than this are treated as floating-point noise
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Upper bound on windows per session
pub const MAX_SEGMENTS: usize = 100_000;

/// Builds segments from raw modality streams
pub struct SegmentSynchronizer {
    window_sec: f64,
}

impl SegmentSynchronizer {
    pub fn new(window_sec: f64) -> Result<Self, EvaluationError> {
        if !window_sec.is_finite() || window_sec <= 0.0 {
            return Err(EvaluationError::ConfigurationError(format!(
                "window width must be positive, got {}",
                window_sec
            )));
        }
        Ok(Self { window_sec })
    }

    /// Window boundaries `[(start, end)]` for a session duration.
    ///
    /// A trailing remainder of at least half a window is kept as its own
    /// window; a shorter one is folded into the previous window. Sessions
    /// needing more than [`MAX_SEGMENTS`] windows are rejected.
    pub fn boundaries(&self, duration_sec: f64) -> Result<Vec<(f64, f64)>, EvaluationError> {
        let w = self.window_sec;
        let windows = (duration_sec / w).ceil();
        if !windows.is_finite() || windows > MAX_SEGMENTS as f64 {
            return Err(EvaluationError::InvalidSession(format!(
                "a {} s recording needs {} windows of {} s, limit is {}",
                duration_sec, windows, w, MAX_SEGMENTS
            )));
        }
        let full = (duration_sec / w + BOUNDARY_EPSILON).floor() as usize;
        let remainder = duration_sec - full as f64 * w;

        let mut bounds: Vec<(f64, f64)> = (0..full)
            .map(|k| (k as f64 * w, (k + 1) as f64 * w))
            .collect();

        if remainder > BOUNDARY_EPSILON {
            let start = full as f64 * w;
            match bounds.last_mut() {
                Some(last) if remainder < w / 2.0 => last.1 = duration_sec,
                _ => bounds.push((start, duration_sec)),
            }
        } else if let Some(last) = bounds.last_mut() {
            last.1 = duration_sec;
        }

        Ok(bounds)
    }

    /// Merge all observations of a session into ordered segments.
    ///
    /// Present measurements outside value [0, 1] or confidence (0, 1] are
    /// treated as absent.
    pub fn synchronize(
        &self,
        session: &Session,
        mut observations: Vec<Observation>,
    ) -> Result<Vec<Segment>, EvaluationError> {
        let bounds = self.boundaries(session.duration_sec)?;
        let starts: Vec<f64> = bounds.iter().map(|(start, _)| *start).collect();

        observations.sort_by(|a, b| {
            a.modality
                .cmp(&b.modality)
                .then(a.timestamp_sec.total_cmp(&b.timestamp_sec))
        });

        let mut buckets: Vec<BTreeMap<Modality, Vec<Observation>>> = vec![BTreeMap::new(); bounds.len()];
        let mut dropped = 0usize;
        let mut malformed: BTreeMap<Modality, usize> = BTreeMap::new();
        for mut obs in observations {
            let t = obs.timestamp_sec;
            if !t.is_finite() || t < 0.0 || t >= session.duration_sec {
                dropped += 1;
                continue;
            }
            if !obs.measurement.is_well_formed() {
                *malformed.entry(obs.modality).or_default() += 1;
                obs.measurement = Measurement::Absent;
            }
            let index = starts.partition_point(|start| *start <= t).saturating_sub(1);
            buckets[index].entry(obs.modality).or_default().push(obs);
        }
        if dropped > 0 {
            debug!(dropped, session_id = %session.session_id, "observations outside the recording dropped");
        }
        for (modality, count) in malformed {
            warn!(
                %modality,
                count,
                session_id = %session.session_id,
                "out-of-range measurements treated as absent"
            );
        }

        let segments: Vec<Segment> = bounds
            .into_iter()
            .zip(buckets)
            .enumerate()
            .map(|(index, ((start_sec, end_sec), bucket))| {
                let mut measurements = BTreeMap::new();
                let mut sample_counts = BTreeMap::new();
                for modality in Modality::ALL {
                    let samples = bucket.get(&modality).map(Vec::as_slice).unwrap_or(&[]);
                    sample_counts.insert(modality, samples.len() as u32);
                    measurements.insert(modality, merge_window(samples));
                }
                Segment {
                    index,
                    start_sec,
                    end_sec,
                    measurements,
                    sample_counts,
                }
            })
            .collect();

        debug!(
            segments = segments.len(),
            window_sec = self.window_sec,
            "segments synchronized"
        );
        Ok(segments)
    }
}

/// Confidence-weighted average of one modality's samples within a window
fn merge_window(samples: &[Observation]) -> Measurement {
    let present: Vec<(f64, f64, &[f64])> = samples
        .iter()
        .filter_map(|obs| match &obs.measurement {
            Measurement::Present {
                value,
                confidence,
                features,
            } if *confidence > 0.0 => Some((*value, *confidence, features.as_slice())),
            _ => None,
        })
        .collect();

    if present.is_empty() {
        return Measurement::Absent;
    }

    let weight_sum: f64 = present.iter().map(|(_, c, _)| c).sum();
    let value = present.iter().map(|(v, c, _)| v * c).sum::<f64>() / weight_sum;
    let confidence = weight_sum / present.len() as f64;

    // Feature vectors are averaged only when every sample has the same shape
    let feature_len = present[0].2.len();
    let features = if present.iter().all(|(_, _, f)| f.len() == feature_len) {
        (0..feature_len)
            .map(|i| present.iter().map(|(_, c, f)| f[i] * c).sum::<f64>() / weight_sum)
            .collect()
    } else {
        Vec::new()
    };

    Measurement::present(value, confidence, features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session(duration: f64) -> Session {
        Session {
            session_id: "s-1".to_string(),
            candidate_id: "c-1".to_string(),
            duration_sec: duration,
            questions: vec![],
            recorded_at: None,
        }
    }

    fn obs(modality: Modality, t: f64, value: f64, confidence: f64) -> Observation {
        Observation {
            modality,
            timestamp_sec: t,
            measurement: Measurement::present(value, confidence, vec![value]),
        }
    }

    #[test]
    fn test_exact_multiple_boundaries() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let bounds = sync.boundaries(60.0).unwrap();
        assert_eq!(bounds.len(), 12);
        assert_eq!(bounds[0], (0.0, 5.0));
        assert_eq!(bounds[11], (55.0, 60.0));
    }

    #[test]
    fn test_long_remainder_kept() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let bounds = sync.boundaries(13.0).unwrap();
        assert_eq!(bounds, vec![(0.0, 5.0), (5.0, 10.0), (10.0, 13.0)]);
    }

    #[test]
    fn test_short_remainder_merged() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let bounds = sync.boundaries(12.0).unwrap();
        assert_eq!(bounds, vec![(0.0, 5.0), (5.0, 12.0)]);
    }

    #[test]
    fn test_half_window_remainder_kept() {
        let sync = SegmentSynchronizer::new(4.0).unwrap();
        let bounds = sync.boundaries(10.0).unwrap();
        assert_eq!(bounds, vec![(0.0, 4.0), (4.0, 8.0), (8.0, 10.0)]);
    }

    #[test]
    fn test_session_shorter_than_window() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        assert_eq!(sync.boundaries(1.5).unwrap(), vec![(0.0, 1.5)]);
        assert_eq!(sync.boundaries(3.0).unwrap(), vec![(0.0, 3.0)]);
    }

    #[test]
    fn test_boundaries_cover_without_gaps() {
        let sync = SegmentSynchronizer::new(3.0).unwrap();
        for duration in [0.5, 2.9, 3.0, 7.4, 7.5, 100.1] {
            let bounds = sync.boundaries(duration).unwrap();
            assert_eq!(bounds[0].0, 0.0);
            assert_eq!(bounds.last().unwrap().1, duration);
            for pair in bounds.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_window() {
        assert!(SegmentSynchronizer::new(0.0).is_err());
        assert!(SegmentSynchronizer::new(f64::NAN).is_err());
    }

    #[test]
    fn test_confidence_weighted_merge() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let observations = vec![
            obs(Modality::Face, 1.0, 1.0, 0.75),
            obs(Modality::Face, 2.0, 0.0, 0.25),
            obs(Modality::Face, 3.0, 0.2, 0.0),
        ];
        let segments = sync.synchronize(&session(5.0), observations).unwrap();

        assert_eq!(segments.len(), 1);
        let face = segments[0].measurement(Modality::Face);
        // (1.0 * 0.75 + 0.0 * 0.25) / 1.0
        assert!((face.value().unwrap() - 0.75).abs() < 1e-12);
        assert!((face.confidence() - 0.5).abs() < 1e-12);
        assert_eq!(segments[0].sample_counts[&Modality::Face], 3);
    }

    #[test]
    fn test_missing_modality_is_absent() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let observations = vec![
            obs(Modality::Face, 1.0, 0.5, 0.9),
            Observation {
                modality: Modality::Voice,
                timestamp_sec: 2.0,
                measurement: Measurement::Absent,
            },
        ];
        let segments = sync.synchronize(&session(10.0), observations).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(segments[0].measurement(Modality::Face).is_present());
        assert_eq!(*segments[0].measurement(Modality::Voice), Measurement::Absent);
        assert_eq!(*segments[0].measurement(Modality::Gaze), Measurement::Absent);
        assert_eq!(*segments[1].measurement(Modality::Face), Measurement::Absent);
    }

    #[test]
    fn test_merged_tail_receives_late_samples() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let observations = vec![obs(Modality::Gaze, 11.5, 0.4, 0.8)];
        let segments = sync.synchronize(&session(12.0), observations).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].end_sec, 12.0);
        assert!(segments[1].measurement(Modality::Gaze).is_present());
    }

    #[test]
    fn test_out_of_range_observations_dropped() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let observations = vec![
            obs(Modality::Face, -1.0, 0.5, 0.9),
            obs(Modality::Face, 10.0, 0.5, 0.9),
            obs(Modality::Face, f64::NAN, 0.5, 0.9),
        ];
        let segments = sync.synchronize(&session(10.0), observations).unwrap();
        assert!(segments
            .iter()
            .all(|s| !s.measurement(Modality::Face).is_present()));
    }

    #[test]
    fn test_out_of_range_measurement_cannot_dominate_window() {
        let sync = SegmentSynchronizer::new(5.0).unwrap();
        let observations = vec![
            obs(Modality::Face, 1.0, 0.2, 0.9),
            Observation {
                modality: Modality::Face,
                timestamp_sec: 2.0,
                measurement: Measurement::Present {
                    value: 7.0,
                    confidence: 50.0,
                    features: vec![7.0],
                },
            },
            Observation {
                modality: Modality::Voice,
                timestamp_sec: 3.0,
                measurement: Measurement::Present {
                    value: 0.5,
                    confidence: -1.0,
                    features: vec![],
                },
            },
        ];
        let segments = sync.synchronize(&session(5.0), observations).unwrap();

        let face = segments[0].measurement(Modality::Face);
        assert!((face.value().unwrap() - 0.2).abs() < 1e-12);
        assert!((face.confidence() - 0.9).abs() < 1e-12);
        assert_eq!(segments[0].sample_counts[&Modality::Face], 2);
        assert_eq!(*segments[0].measurement(Modality::Voice), Measurement::Absent);
    }

    #[test]
    fn test_segment_count_is_bounded() {
        let sync = SegmentSynchronizer::new(1e-6).unwrap();
        assert!(matches!(
            sync.boundaries(1e6),
            Err(EvaluationError::InvalidSession(_))
        ));
        assert!(matches!(
            sync.synchronize(&session(1e6), vec![]),
            Err(EvaluationError::InvalidSession(_))
        ));

        let sync = SegmentSynchronizer::new(1.0).unwrap();
        assert_eq!(sync.boundaries(MAX_SEGMENTS as f64).unwrap().len(), MAX_SEGMENTS);
        assert!(sync.boundaries(MAX_SEGMENTS as f64 + 1.0).is_err());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let sync = SegmentSynchronizer::new(2.0).unwrap();
        let observations = vec![
            obs(Modality::Voice, 0.1, 0.3, 0.7),
            obs(Modality::Face, 0.4, 0.9, 0.6),
            obs(Modality::Voice, 1.1, 0.6, 0.2),
            obs(Modality::Face, 3.3, 0.1, 0.9),
            obs(Modality::Voice, 0.7, 0.45, 0.5),
        ];
        let mut reversed = observations.clone();
        reversed.reverse();

        let a = sync.synchronize(&session(4.0), observations).unwrap();
        let b = sync.synchronize(&session(4.0), reversed).unwrap();
        assert_eq!(a, b);
    }
}
