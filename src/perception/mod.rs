//! Perception adapter
//!
//! This module wraps the external face, gaze and voice inference services
//! behind one call contract, `measure(chunk, modality) -> Measurement`.
//! Service responses are validated against a versioned [`FeatureContract`],
//! normalized and projected onto 0-1. A chunk without a detectable face or
//! voice becomes [`Measurement::Absent`]; an unreachable service aborts the
//! session.

mod contract;
#[cfg(feature = "http")]
mod http;
mod pool;

pub use contract::{FeatureContract, FeatureSpec};
#[cfg(feature = "http")]
pub use http::HttpPerceptionService;
pub use pool::ModalityPool;

use crate::config::PerceptionConfig;
use crate::error::EvaluationError;
use crate::types::{Measurement, Modality};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Kind of media carried by a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Bounded slice of the session media handed to a perception service
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub start_sec: f64,
    pub end_sec: f64,
    pub kind: MediaKind,
    pub payload: Bytes,
}

impl MediaChunk {
    pub fn video(start_sec: f64, end_sec: f64, payload: impl Into<Bytes>) -> Self {
        Self {
            start_sec,
            end_sec,
            kind: MediaKind::Video,
            payload: payload.into(),
        }
    }

    pub fn audio(start_sec: f64, end_sec: f64, payload: impl Into<Bytes>) -> Self {
        Self {
            start_sec,
            end_sec,
            kind: MediaKind::Audio,
            payload: payload.into(),
        }
    }

    /// Timestamp assigned to the measurement taken from this chunk
    pub fn midpoint_sec(&self) -> f64 {
        (self.start_sec + self.end_sec) / 2.0
    }
}

/// Media chunks of one session, split by kind
#[derive(Debug, Clone, Default)]
pub struct SessionMedia {
    pub video: Vec<MediaChunk>,
    pub audio: Vec<MediaChunk>,
}

impl SessionMedia {
    /// Chunks a modality consumes
    pub fn chunks_for(&self, modality: Modality) -> &[MediaChunk] {
        match media_kind(modality) {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }
}

/// Media kind each modality is measured from
pub fn media_kind(modality: Modality) -> MediaKind {
    match modality {
        Modality::Face | Modality::Gaze => MediaKind::Video,
        Modality::Voice => MediaKind::Audio,
    }
}

/// Raw response of an inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInference {
    pub schema_version: String,
    pub features: Vec<f64>,
    pub confidence: f64,
}

/// Failure reported by an inference service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service unreachable: {0}")]
    Unreachable(String),

    #[error("no detectable signal: {0}")]
    NoSignal(String),
}

/// External per-modality inference endpoint
#[async_trait]
pub trait PerceptionService: Send + Sync {
    /// Run inference on one chunk
    async fn infer(&self, chunk: &MediaChunk) -> Result<RawInference, ServiceError>;
}

/// Uniform front for all perception services
pub struct PerceptionAdapter {
    services: BTreeMap<Modality, Arc<dyn PerceptionService>>,
    contracts: BTreeMap<Modality, FeatureContract>,
    max_chunk_bytes: usize,
}

impl PerceptionAdapter {
    /// Create an adapter with the configured contracts and no services yet
    pub fn new(config: &PerceptionConfig) -> Self {
        Self {
            services: BTreeMap::new(),
            contracts: config
                .contracts
                .iter()
                .map(|c| (c.modality, c.clone()))
                .collect(),
            max_chunk_bytes: config.max_chunk_bytes,
        }
    }

    /// Register the service for a modality. Requires a contract for it.
    pub fn with_service(
        mut self,
        modality: Modality,
        service: Arc<dyn PerceptionService>,
    ) -> Result<Self, EvaluationError> {
        if !self.contracts.contains_key(&modality) {
            return Err(EvaluationError::ConfigurationError(format!(
                "no feature contract configured for {}",
                modality
            )));
        }
        self.services.insert(modality, service);
        Ok(self)
    }

    pub fn has_service(&self, modality: Modality) -> bool {
        self.services.contains_key(&modality)
    }

    /// Measure one chunk for one modality.
    ///
    /// Every call goes to the service; nothing is cached between chunks.
    pub async fn measure(
        &self,
        chunk: &MediaChunk,
        modality: Modality,
    ) -> Result<Measurement, EvaluationError> {
        if chunk.payload.len() > self.max_chunk_bytes {
            return Err(EvaluationError::ChunkTooLarge {
                size: chunk.payload.len(),
                limit: self.max_chunk_bytes,
            });
        }
        if chunk.kind != media_kind(modality) {
            return Err(EvaluationError::InvalidSession(format!(
                "{:?} chunk cannot be measured for {}",
                chunk.kind, modality
            )));
        }

        let service = self.services.get(&modality).ok_or_else(|| {
            EvaluationError::PerceptionUnavailable {
                modality,
                reason: "no service registered".to_string(),
            }
        })?;
        let contract = self.contracts.get(&modality).ok_or_else(|| {
            EvaluationError::ConfigurationError(format!(
                "no feature contract configured for {}",
                modality
            ))
        })?;

        let inference = match service.infer(chunk).await {
            Ok(inference) => inference,
            Err(ServiceError::NoSignal(reason)) => {
                debug!(%modality, start_sec = chunk.start_sec, %reason, "low signal quality");
                return Ok(Measurement::Absent);
            }
            Err(ServiceError::Unreachable(reason)) => {
                return Err(EvaluationError::PerceptionUnavailable { modality, reason });
            }
        };

        contract
            .check_schema(&inference.schema_version, inference.features.len())
            .map_err(|reason| EvaluationError::ContractViolation { modality, reason })?;

        if !(inference.confidence.is_finite() && (0.0..=1.0).contains(&inference.confidence)) {
            warn!(
                %modality,
                start_sec = chunk.start_sec,
                confidence = inference.confidence,
                "confidence outside [0, 1], treating sample as absent"
            );
            return Ok(Measurement::Absent);
        }

        let Some(features) = contract.normalize(&inference.features) else {
            warn!(%modality, start_sec = chunk.start_sec, "non-finite feature value, treating sample as absent");
            return Ok(Measurement::Absent);
        };

        let value = contract.project(&features);
        Ok(Measurement::present(value, inference.confidence, features))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted service: answers by chunk start time, tracks concurrency
    pub struct ScriptedService {
        pub respond: Box<dyn Fn(&MediaChunk) -> Result<RawInference, ServiceError> + Send + Sync>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl ScriptedService {
        pub fn new(
            respond: impl Fn(&MediaChunk) -> Result<RawInference, ServiceError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl PerceptionService for ScriptedService {
        async fn infer(&self, chunk: &MediaChunk) -> Result<RawInference, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.respond)(chunk)
        }
    }

    pub fn inference(schema: &str, features: Vec<f64>, confidence: f64) -> RawInference {
        RawInference {
            schema_version: schema.to_string(),
            features,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{inference, ScriptedService};
    use super::*;
    use std::sync::atomic::Ordering;

    fn adapter_with(modality: Modality, service: Arc<ScriptedService>) -> PerceptionAdapter {
        PerceptionAdapter::new(&PerceptionConfig::default())
            .with_service(modality, service)
            .unwrap()
    }

    #[tokio::test]
    async fn test_measure_projects_features() {
        let service = Arc::new(ScriptedService::new(|_| {
            Ok(inference("gaze.v1", vec![1.0, 0.0], 0.9))
        }));
        let adapter = adapter_with(Modality::Gaze, service);

        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 16]);
        let measurement = adapter.measure(&chunk, Modality::Gaze).await.unwrap();

        // 0.7 * 1.0 + 0.3 * 0.0
        assert!((measurement.value().unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(measurement.confidence(), 0.9);
    }

    #[tokio::test]
    async fn test_no_signal_is_absent_not_error() {
        let service = Arc::new(ScriptedService::new(|_| {
            Err(ServiceError::NoSignal("no face".to_string()))
        }));
        let adapter = adapter_with(Modality::Face, service);

        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 4]);
        let measurement = adapter.measure(&chunk, Modality::Face).await.unwrap();
        assert_eq!(measurement, Measurement::Absent);
    }

    #[tokio::test]
    async fn test_zero_confidence_is_absent() {
        let service = Arc::new(ScriptedService::new(|_| {
            Ok(inference("voice.v1", vec![0.5, 0.5, 0.5], 0.0))
        }));
        let adapter = adapter_with(Modality::Voice, service);

        let chunk = MediaChunk::audio(0.0, 1.0, vec![0u8; 4]);
        let measurement = adapter.measure(&chunk, Modality::Voice).await.unwrap();
        assert!(!measurement.is_present());
    }

    #[tokio::test]
    async fn test_unreachable_is_fatal() {
        let service = Arc::new(ScriptedService::new(|_| {
            Err(ServiceError::Unreachable("connection refused".to_string()))
        }));
        let adapter = adapter_with(Modality::Voice, service);

        let chunk = MediaChunk::audio(0.0, 1.0, vec![0u8; 4]);
        let result = adapter.measure(&chunk, Modality::Voice).await;
        assert!(matches!(
            result,
            Err(EvaluationError::PerceptionUnavailable {
                modality: Modality::Voice,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_contract_violation() {
        let service = Arc::new(ScriptedService::new(|_| {
            Ok(inference("face.v9", vec![0.5, 0.5, 0.5], 0.8))
        }));
        let adapter = adapter_with(Modality::Face, service);

        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 4]);
        let result = adapter.measure(&chunk, Modality::Face).await;
        assert!(matches!(
            result,
            Err(EvaluationError::ContractViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_sample_is_absorbed() {
        let service = Arc::new(ScriptedService::new(|_| {
            Ok(inference("face.v1", vec![f64::NAN, 0.5, 0.5], 0.8))
        }));
        let adapter = adapter_with(Modality::Face, service);

        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 4]);
        let measurement = adapter.measure(&chunk, Modality::Face).await.unwrap();
        assert_eq!(measurement, Measurement::Absent);
    }

    #[tokio::test]
    async fn test_missing_service_is_unavailable() {
        let adapter = PerceptionAdapter::new(&PerceptionConfig::default());
        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 4]);
        let result = adapter.measure(&chunk, Modality::Gaze).await;
        assert!(matches!(
            result,
            Err(EvaluationError::PerceptionUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected_before_call() {
        let service = Arc::new(ScriptedService::new(|_| {
            Ok(inference("gaze.v1", vec![0.5, 0.5], 0.9))
        }));
        let mut config = PerceptionConfig::default();
        config.max_chunk_bytes = 8;
        let adapter = PerceptionAdapter::new(&config)
            .with_service(Modality::Gaze, service.clone())
            .unwrap();

        let chunk = MediaChunk::video(0.0, 1.0, vec![0u8; 9]);
        let result = adapter.measure(&chunk, Modality::Gaze).await;
        assert!(matches!(
            result,
            Err(EvaluationError::ChunkTooLarge { size: 9, limit: 8 })
        ));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_chunk_hits_the_service() {
        let service = Arc::new(ScriptedService::new(|chunk| {
            let v = if chunk.start_sec < 1.0 { 0.2 } else { 0.9 };
            Ok(inference("gaze.v1", vec![v, v], 0.9))
        }));
        let adapter = adapter_with(Modality::Gaze, service.clone());

        let first = adapter
            .measure(&MediaChunk::video(0.0, 1.0, vec![1u8]), Modality::Gaze)
            .await
            .unwrap();
        let second = adapter
            .measure(&MediaChunk::video(1.0, 2.0, vec![1u8]), Modality::Gaze)
            .await
            .unwrap();

        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert!(first.value().unwrap() < second.value().unwrap());
    }

    #[test]
    fn test_registering_without_contract_fails() {
        let mut config = PerceptionConfig::default();
        config.contracts.retain(|c| c.modality != Modality::Voice);
        let service = Arc::new(ScriptedService::new(|_| {
            Err(ServiceError::NoSignal(String::new()))
        }));
        let result = PerceptionAdapter::new(&config).with_service(Modality::Voice, service);
        assert!(result.is_err());
    }

    #[test]
    fn test_session_media_routes_by_kind() {
        let media = SessionMedia {
            video: vec![MediaChunk::video(0.0, 1.0, vec![1u8])],
            audio: vec![
                MediaChunk::audio(0.0, 1.0, vec![1u8]),
                MediaChunk::audio(1.0, 2.0, vec![1u8]),
            ],
        };
        assert_eq!(media.chunks_for(Modality::Face).len(), 1);
        assert_eq!(media.chunks_for(Modality::Gaze).len(), 1);
        assert_eq!(media.chunks_for(Modality::Voice).len(), 2);
    }
}
