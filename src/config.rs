//! Engine configuration
//!
//! Every tunable of the pipeline lives here: window width, smoothing, dimension
//! weights, calibration constants, outlier threshold and perception pool sizing.
//! Configuration is validated once at load time; nothing downstream re-checks it.

use crate::error::EvaluationError;
use crate::perception::FeatureContract;
use crate::types::Modality;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default evaluation window width in seconds
pub const DEFAULT_WINDOW_SEC: f64 = 5.0;

/// Default largest accepted media chunk (50 MiB)
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 50 * 1024 * 1024;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Segment window width in seconds
    pub window_sec: f64,
    pub aggregation: AggregationConfig,
    /// Evaluation dimensions in report order
    pub dimensions: Vec<DimensionConfig>,
    /// Version tag of the calibration constants in `dimensions`
    pub calibration_version: String,
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
}

/// Temporal aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Share of history retained per segment, in [0, 1)
    pub decay: f64,
    /// Segments below this confidence are rejected
    pub min_confidence: f64,
}

/// One evaluation dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    /// Weight of this dimension in the overall score
    pub weight: f64,
    pub modalities: Vec<ModalityWeight>,
    #[serde(default)]
    pub calibration: Calibration,
}

/// Base weight of a modality within a dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityWeight {
    pub modality: Modality,
    pub weight: f64,
}

/// Bias correction applied to the 0-100 raw dimension value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl Calibration {
    /// Apply to a raw [0, 100] value and clamp back into [0, 100]
    pub fn apply(&self, raw: f64) -> f64 {
        (raw * self.scale + self.offset).clamp(0.0, 100.0)
    }
}

/// Evidence (outlier) detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Standard deviations from the session mean before a segment is flagged
    pub outlier_sigma: f64,
}

/// Perception worker pool and contract settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Concurrent in-flight calls per modality
    pub workers_per_modality: usize,
    /// Bounded job queue length per modality
    pub queue_capacity: usize,
    pub max_chunk_bytes: usize,
    pub contracts: Vec<FeatureContract>,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            workers_per_modality: 4,
            queue_capacity: 16,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            contracts: FeatureContract::defaults(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_sec: DEFAULT_WINDOW_SEC,
            aggregation: AggregationConfig {
                decay: 0.6,
                min_confidence: 0.3,
            },
            dimensions: vec![
                DimensionConfig {
                    name: "confidence".to_string(),
                    weight: 1.0,
                    modalities: vec![
                        ModalityWeight {
                            modality: Modality::Gaze,
                            weight: 0.4,
                        },
                        ModalityWeight {
                            modality: Modality::Voice,
                            weight: 0.6,
                        },
                    ],
                    calibration: Calibration::default(),
                },
                DimensionConfig {
                    name: "engagement".to_string(),
                    weight: 1.0,
                    modalities: vec![
                        ModalityWeight {
                            modality: Modality::Face,
                            weight: 0.5,
                        },
                        ModalityWeight {
                            modality: Modality::Voice,
                            weight: 0.5,
                        },
                    ],
                    calibration: Calibration::default(),
                },
                DimensionConfig {
                    name: "composure".to_string(),
                    weight: 1.0,
                    modalities: vec![
                        ModalityWeight {
                            modality: Modality::Face,
                            weight: 0.6,
                        },
                        ModalityWeight {
                            modality: Modality::Gaze,
                            weight: 0.4,
                        },
                    ],
                    calibration: Calibration::default(),
                },
            ],
            calibration_version: "uncalibrated".to_string(),
            evidence: EvidenceConfig { outlier_sigma: 2.0 },
            perception: PerceptionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, EvaluationError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EvaluationError::ConfigurationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, EvaluationError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EvaluationError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, EvaluationError> {
        serde_json::to_string_pretty(self).map_err(EvaluationError::JsonError)
    }

    /// Modalities referenced by at least one dimension
    pub fn scored_modalities(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| {
                self.dimensions
                    .iter()
                    .any(|d| d.modalities.iter().any(|mw| mw.modality == *m))
            })
            .collect()
    }

    /// Check every constraint; the first violation is reported
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if !self.window_sec.is_finite() || self.window_sec <= 0.0 {
            return Err(config_error(format!(
                "window_sec must be positive, got {}",
                self.window_sec
            )));
        }

        let agg = &self.aggregation;
        if !(0.0..1.0).contains(&agg.decay) {
            return Err(config_error(format!(
                "aggregation.decay must be in [0, 1), got {}",
                agg.decay
            )));
        }
        if !(0.0..=1.0).contains(&agg.min_confidence) {
            return Err(config_error(format!(
                "aggregation.min_confidence must be in [0, 1], got {}",
                agg.min_confidence
            )));
        }

        if !self.evidence.outlier_sigma.is_finite() || self.evidence.outlier_sigma <= 0.0 {
            return Err(config_error(format!(
                "evidence.outlier_sigma must be positive, got {}",
                self.evidence.outlier_sigma
            )));
        }

        if self.calibration_version.trim().is_empty() {
            return Err(config_error("calibration_version must not be empty"));
        }

        if self.dimensions.is_empty() {
            return Err(config_error("at least one dimension is required"));
        }

        let mut names = HashSet::new();
        for dimension in &self.dimensions {
            dimension.validate()?;
            if !names.insert(dimension.name.as_str()) {
                return Err(config_error(format!(
                    "duplicate dimension '{}'",
                    dimension.name
                )));
            }
        }

        self.perception.validate()
    }
}

impl DimensionConfig {
    fn validate(&self) -> Result<(), EvaluationError> {
        if self.name.trim().is_empty() {
            return Err(config_error("dimension name must not be empty"));
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(config_error(format!(
                "dimension '{}' weight must be positive, got {}",
                self.name, self.weight
            )));
        }
        if self.modalities.is_empty() {
            return Err(config_error(format!(
                "dimension '{}' has no modalities",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for mw in &self.modalities {
            if !seen.insert(mw.modality) {
                return Err(config_error(format!(
                    "dimension '{}' lists {} twice",
                    self.name, mw.modality
                )));
            }
            if !mw.weight.is_finite() || mw.weight <= 0.0 {
                return Err(config_error(format!(
                    "dimension '{}' weight for {} must be positive, got {}",
                    self.name, mw.modality, mw.weight
                )));
            }
        }

        let cal = &self.calibration;
        if !cal.scale.is_finite() || cal.scale <= 0.0 || !cal.offset.is_finite() {
            return Err(config_error(format!(
                "dimension '{}' calibration must have a positive finite scale and finite offset",
                self.name
            )));
        }

        Ok(())
    }
}

impl PerceptionConfig {
    fn validate(&self) -> Result<(), EvaluationError> {
        if self.workers_per_modality == 0 {
            return Err(config_error("perception.workers_per_modality must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(config_error("perception.queue_capacity must be at least 1"));
        }
        if self.max_chunk_bytes == 0 {
            return Err(config_error("perception.max_chunk_bytes must be at least 1"));
        }

        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.modality) {
                return Err(config_error(format!(
                    "more than one feature contract for {}",
                    contract.modality
                )));
            }
            contract.validate()?;
        }

        Ok(())
    }

    /// Contract for a modality, if configured
    pub fn contract(&self, modality: Modality) -> Option<&FeatureContract> {
        self.contracts.iter().find(|c| c.modality == modality)
    }
}

fn config_error(msg: impl Into<String>) -> EvaluationError {
    EvaluationError::ConfigurationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dimensions.len(), 3);
        assert_eq!(config.scored_modalities(), Modality::ALL.to_vec());
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        let loaded = EngineConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_rejects_non_positive_window() {
        let mut config = EngineConfig::default();
        config.window_sec = 0.0;
        assert!(matches!(
            config.validate(),
            Err(EvaluationError::ConfigurationError(_))
        ));

        config.window_sec = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut config = EngineConfig::default();
        config.dimensions[0].modalities[0].weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.dimensions[1].weight = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.dimensions[2].modalities.clear();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        let dup = config.dimensions[0].modalities[0].clone();
        config.dimensions[0].modalities.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_aggregation() {
        let mut config = EngineConfig::default();
        config.aggregation.decay = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.aggregation.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_dimension_names() {
        let mut config = EngineConfig::default();
        let dup = config.dimensions[0].clone();
        config.dimensions.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calibration_clamps() {
        let cal = Calibration {
            scale: 1.2,
            offset: 10.0,
        };
        assert_eq!(cal.apply(50.0), 70.0);
        assert_eq!(cal.apply(95.0), 100.0);

        let cal = Calibration {
            scale: 1.0,
            offset: -20.0,
        };
        assert_eq!(cal.apply(10.0), 0.0);
    }

    #[test]
    fn test_from_json_reports_parse_errors_as_configuration() {
        let result = EngineConfig::from_json("{ not json");
        assert!(matches!(
            result,
            Err(EvaluationError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_calibration_defaults_when_omitted() {
        let json = r#"{
            "window_sec": 2.0,
            "aggregation": { "decay": 0.5, "min_confidence": 0.2 },
            "dimensions": [
                { "name": "engagement", "weight": 1.0,
                  "modalities": [ { "modality": "face", "weight": 1.0 } ] }
            ],
            "calibration_version": "v1",
            "evidence": { "outlier_sigma": 2.5 }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.dimensions[0].calibration, Calibration::default());
        assert_eq!(config.perception, PerceptionConfig::default());
    }
}
