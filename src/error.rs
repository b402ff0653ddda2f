//! Error types for the SEI scoring engine

use crate::types::Modality;
use thiserror::Error;

/// Errors that end a session evaluation.
///
/// Per-sample problems (a frame without a face, a clip without voice, a
/// malformed feature value) never surface here: they are absorbed as
/// [`Measurement::Absent`](crate::types::Measurement::Absent).
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Perception service unavailable for {modality}: {reason}")]
    PerceptionUnavailable { modality: Modality, reason: String },

    #[error("Perception contract violated for {modality}: {reason}")]
    ContractViolation { modality: Modality, reason: String },

    #[error("Insufficient signal: no dimension could be scored (missing modalities: {missing_modalities:?})")]
    InsufficientSignal { missing_modalities: Vec<Modality> },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Media chunk of {size} bytes exceeds the {limit} byte limit")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("Session evaluation cancelled")]
    Cancelled,

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl EvaluationError {
    /// Whether this error belongs to the session (as opposed to the caller's setup)
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            EvaluationError::PerceptionUnavailable { .. }
                | EvaluationError::ContractViolation { .. }
                | EvaluationError::InsufficientSignal { .. }
                | EvaluationError::Cancelled
        )
    }
}
