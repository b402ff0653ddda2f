//! Pipeline orchestration
//!
//! This module provides the public API of the scoring engine. It runs a
//! session through every stage: perception (per-modality worker pools, live
//! evaluation only), segment synchronization, temporal aggregation, fusion
//! and report building.

use crate::aggregator::TemporalAggregator;
use crate::config::EngineConfig;
use crate::error::EvaluationError;
use crate::perception::{ModalityPool, PerceptionAdapter, SessionMedia};
use crate::report::ReportBuilder;
use crate::synchronizer::SegmentSynchronizer;
use crate::types::{Modality, Observation, Report, Session, SessionRecording};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Score a session from already-measured modality streams.
///
/// Pipeline stages:
/// 1. SegmentSynchronizer - Align streams onto fixed windows
/// 2. TemporalAggregator - Smooth and weight by reliability
/// 3. FusionEngine - Renormalized, calibrated sub-scores
/// 4. ReportBuilder - Session, question and segment views plus evidence
///
/// # Example
/// ```ignore
/// let report = score_recording(&recording, &EngineConfig::default())?;
/// println!("{}", report.overall_score);
/// ```
pub fn score_recording(
    recording: &SessionRecording,
    config: &EngineConfig,
) -> Result<Report, EvaluationError> {
    config.validate()?;
    score_observations(&recording.session, recording.observations.clone(), config)
}

/// Score a JSON [`SessionRecording`] and return the report as JSON.
///
/// # Arguments
/// * `recording_json` - Session metadata plus observations
/// * `config_json` - Engine configuration; the default configuration when `None`
pub fn evaluate_json(
    recording_json: &str,
    config_json: Option<&str>,
) -> Result<String, EvaluationError> {
    let config = match config_json {
        Some(json) => EngineConfig::from_json(json)?,
        None => EngineConfig::default(),
    };
    let recording: SessionRecording = serde_json::from_str(recording_json)
        .map_err(|e| EvaluationError::ParseError(format!("invalid session recording: {}", e)))?;

    score_recording(&recording, &config)?.to_json()
}

/// Run the post-perception stages. `config` must already be validated.
fn score_observations(
    session: &Session,
    observations: Vec<Observation>,
    config: &EngineConfig,
) -> Result<Report, EvaluationError> {
    session.validate()?;

    let synchronizer = SegmentSynchronizer::new(config.window_sec)?;
    let segments = synchronizer.synchronize(session, observations)?;

    let timeline = TemporalAggregator::new(&config.aggregation).aggregate(&segments);

    let report = ReportBuilder::new(config).build(session, &timeline)?;

    info!(
        session_id = %report.session_id,
        overall_score = report.overall_score,
        segments = report.quality.segment_count,
        evidence = report.evidence.len(),
        "session scored"
    );
    Ok(report)
}

/// Live evaluator: runs perception over session media, then scores it.
///
/// Each modality gets its own bounded worker pool. All pools are joined
/// before synchronization starts, and their streams are merged by this
/// evaluator alone, in fixed modality order.
pub struct SessionEvaluator {
    adapter: Arc<PerceptionAdapter>,
    config: EngineConfig,
}

impl SessionEvaluator {
    /// Create an evaluator. The configuration is validated before any media
    /// is touched.
    pub fn new(adapter: PerceptionAdapter, config: EngineConfig) -> Result<Self, EvaluationError> {
        config.validate()?;
        Ok(Self {
            adapter: Arc::new(adapter),
            config,
        })
    }

    /// Evaluate one session.
    ///
    /// Cancelling `cancel` (or any fatal perception error) abandons in-flight
    /// calls and returns an error; no partial report is ever produced. A
    /// failure only cancels this session, never the caller's token.
    pub async fn evaluate(
        &self,
        session: &Session,
        media: &SessionMedia,
        cancel: CancellationToken,
    ) -> Result<Report, EvaluationError> {
        session.validate()?;

        let scored = self.config.scored_modalities();
        let measured: Vec<Modality> = scored
            .iter()
            .copied()
            .filter(|m| self.adapter.has_service(*m))
            .collect();
        if measured.is_empty() {
            return Err(EvaluationError::PerceptionUnavailable {
                modality: scored.first().copied().unwrap_or(Modality::Face),
                reason: "no perception service registered for any scored modality".to_string(),
            });
        }
        for modality in scored.iter().filter(|m| !measured.contains(m)) {
            warn!(%modality, "no perception service registered, modality treated as absent");
        }

        let session_cancel = cancel.child_token();
        let mut pools = JoinSet::new();
        for modality in measured {
            let pool = ModalityPool::new(Arc::clone(&self.adapter), modality, &self.config.perception);
            let chunks = media.chunks_for(modality).to_vec();
            let cancel = session_cancel.clone();
            pools.spawn(async move { (modality, pool.run(chunks, cancel).await) });
        }

        // Barrier: every modality stream completes before synchronization
        let mut streams: BTreeMap<Modality, Vec<Observation>> = BTreeMap::new();
        let mut failure: Option<EvaluationError> = None;
        while let Some(joined) = pools.join_next().await {
            match joined {
                Ok((modality, Ok(observations))) => {
                    debug!(%modality, observations = observations.len(), "modality joined");
                    streams.insert(modality, observations);
                }
                Ok((_, Err(EvaluationError::Cancelled))) => {}
                Ok((_, Err(e))) => {
                    session_cancel.cancel();
                    failure.get_or_insert(e);
                }
                Err(join_error) => {
                    session_cancel.cancel();
                    failure.get_or_insert(EvaluationError::EncodingError(format!(
                        "modality task failed: {}",
                        join_error
                    )));
                }
            }
        }

        if let Some(e) = failure {
            warn!(session_id = %session.session_id, error = %e, "session evaluation failed");
            return Err(e);
        }
        if session_cancel.is_cancelled() {
            info!(session_id = %session.session_id, "session evaluation cancelled");
            return Err(EvaluationError::Cancelled);
        }

        let observations: Vec<Observation> = Modality::ALL
            .into_iter()
            .filter_map(|m| streams.remove(&m))
            .flatten()
            .collect();

        score_observations(session, observations, &self.config)
    }
}
