//! SEI Non-Verbal - Multimodal scoring engine for recorded job interviews
//!
//! The engine turns face, gaze and voice signals from an interview recording
//! into a calibrated, repeatable assessment through a deterministic pipeline:
//! perception → segment synchronization → temporal aggregation → fusion →
//! report building.
//!
//! ## Entry points
//!
//! - **Offline scoring**: [`score_recording`] / [`evaluate_json`] for streams
//!   that were already measured
//! - **Live evaluation**: [`SessionEvaluator`] drives the perception services
//!   over session media with bounded per-modality worker pools

pub mod aggregator;
pub mod config;
pub mod error;
pub mod evidence;
pub mod fusion;
pub mod perception;
pub mod pipeline;
pub mod report;
pub mod synchronizer;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::EvaluationError;
pub use perception::{PerceptionAdapter, PerceptionService, SessionMedia};
pub use pipeline::{evaluate_json, score_recording, SessionEvaluator};
pub use report::REPORT_VERSION;
pub use types::{Measurement, Modality, Report, Session, SessionRecording};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "sei-nonverbal";
