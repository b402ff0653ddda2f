//! Feature contracts
//!
//! Each perception service speaks a versioned feature-vector schema. The
//! contract checks the schema, normalizes every feature onto 0-1 and projects
//! the vector onto the single scalar the rest of the pipeline works with.

use crate::error::EvaluationError;
use crate::types::Modality;
use serde::{Deserialize, Serialize};

/// One entry of a feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    /// Raw value mapped to 0
    pub min: f64,
    /// Raw value mapped to 1
    pub max: f64,
    /// Projection weight (normalized over the contract)
    pub weight: f64,
}

/// Versioned feature-vector schema for one modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub modality: Modality,
    pub schema_version: String,
    pub features: Vec<FeatureSpec>,
}

fn spec(name: &str, weight: f64) -> FeatureSpec {
    FeatureSpec {
        name: name.to_string(),
        min: 0.0,
        max: 1.0,
        weight,
    }
}

impl FeatureContract {
    /// Starter contracts for the three built-in modalities
    pub fn defaults() -> Vec<FeatureContract> {
        vec![
            FeatureContract {
                modality: Modality::Face,
                schema_version: "face.v1".to_string(),
                features: vec![
                    spec("positive_affect", 0.4),
                    spec("expressiveness", 0.3),
                    spec("calmness", 0.3),
                ],
            },
            FeatureContract {
                modality: Modality::Gaze,
                schema_version: "gaze.v1".to_string(),
                features: vec![spec("on_camera_ratio", 0.7), spec("fixation_stability", 0.3)],
            },
            FeatureContract {
                modality: Modality::Voice,
                schema_version: "voice.v1".to_string(),
                features: vec![
                    spec("pitch_stability", 0.4),
                    spec("energy", 0.3),
                    spec("fluency", 0.3),
                ],
            },
        ]
    }

    pub fn validate(&self) -> Result<(), EvaluationError> {
        let err = |msg: String| EvaluationError::ConfigurationError(msg);

        if self.schema_version.trim().is_empty() {
            return Err(err(format!("{} contract has no schema_version", self.modality)));
        }
        if self.features.is_empty() {
            return Err(err(format!("{} contract has no features", self.modality)));
        }

        let mut weight_sum = 0.0;
        for feature in &self.features {
            if !feature.min.is_finite() || !feature.max.is_finite() || feature.min >= feature.max {
                return Err(err(format!(
                    "{} feature '{}' needs a finite range with min < max",
                    self.modality, feature.name
                )));
            }
            if !feature.weight.is_finite() || feature.weight < 0.0 {
                return Err(err(format!(
                    "{} feature '{}' weight must be non-negative",
                    self.modality, feature.name
                )));
            }
            weight_sum += feature.weight;
        }

        if weight_sum <= 0.0 {
            return Err(err(format!(
                "{} contract weights must sum to a positive value",
                self.modality
            )));
        }

        Ok(())
    }

    /// Schema-level check of a service response. A failure here means the
    /// service speaks a different contract, which is not a per-sample problem.
    pub fn check_schema(&self, schema_version: &str, feature_len: usize) -> Result<(), String> {
        if schema_version != self.schema_version {
            return Err(format!(
                "expected schema {}, service returned {}",
                self.schema_version, schema_version
            ));
        }
        if feature_len != self.features.len() {
            return Err(format!(
                "expected {} features, service returned {}",
                self.features.len(),
                feature_len
            ));
        }
        Ok(())
    }

    /// Min-max normalize raw features onto 0-1. `None` if any value is not finite.
    pub fn normalize(&self, raw: &[f64]) -> Option<Vec<f64>> {
        self.features
            .iter()
            .zip(raw)
            .map(|(feature, &value)| {
                if !value.is_finite() {
                    return None;
                }
                Some(((value - feature.min) / (feature.max - feature.min)).clamp(0.0, 1.0))
            })
            .collect()
    }

    /// Weighted projection of normalized features onto 0-1
    pub fn project(&self, normalized: &[f64]) -> f64 {
        let weight_sum: f64 = self.features.iter().map(|f| f.weight).sum();
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = self
            .features
            .iter()
            .zip(normalized)
            .map(|(f, v)| f.weight * v)
            .sum();
        (weighted / weight_sum).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_contract() -> FeatureContract {
        FeatureContract {
            modality: Modality::Voice,
            schema_version: "voice.v2".to_string(),
            features: vec![
                FeatureSpec {
                    name: "speech_rate_wpm".to_string(),
                    min: 60.0,
                    max: 220.0,
                    weight: 1.0,
                },
                FeatureSpec {
                    name: "energy".to_string(),
                    min: 0.0,
                    max: 1.0,
                    weight: 3.0,
                },
            ],
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        for contract in FeatureContract::defaults() {
            assert!(contract.validate().is_ok(), "{:?}", contract.modality);
        }
    }

    #[test]
    fn test_normalize_and_project() {
        let contract = voice_contract();
        let normalized = contract.normalize(&[140.0, 0.6]).unwrap();
        assert!((normalized[0] - 0.5).abs() < 1e-12);
        assert!((normalized[1] - 0.6).abs() < 1e-12);

        // (1.0 * 0.5 + 3.0 * 0.6) / 4.0
        let value = contract.project(&normalized);
        assert!((value - 0.575).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_clamps_out_of_range() {
        let contract = voice_contract();
        let normalized = contract.normalize(&[400.0, -2.0]).unwrap();
        assert_eq!(normalized, vec![1.0, 0.0]);
    }

    #[test]
    fn test_normalize_rejects_non_finite() {
        let contract = voice_contract();
        assert!(contract.normalize(&[f64::NAN, 0.5]).is_none());
    }

    #[test]
    fn test_check_schema() {
        let contract = voice_contract();
        assert!(contract.check_schema("voice.v2", 2).is_ok());
        assert!(contract.check_schema("voice.v1", 2).is_err());
        assert!(contract.check_schema("voice.v2", 3).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut contract = voice_contract();
        contract.features[0].max = 10.0;
        assert!(contract.validate().is_err());

        let mut contract = voice_contract();
        for feature in &mut contract.features {
            feature.weight = 0.0;
        }
        assert!(contract.validate().is_err());
    }
}
