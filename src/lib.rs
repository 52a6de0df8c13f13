//! Kinesia - Behavioral movement screening from short video sessions
//!
//! Kinesia turns recorded child-interaction sessions into a calibrated
//! screening score through a deterministic pipeline: quality gating →
//! landmark signal extraction → gap-tolerant windowing → movement
//! features → self-supervised sequence model → calibrated scoring.
//!
//! ## Modules
//!
//! - **Ingestion**: quality gate raw frames and extract landmark records,
//!   or load archived session exports via [`adapters`]
//! - **Features**: sliding-window movement, symmetry, and gaze statistics
//! - **Model**: causal dilated-convolution autoencoder with
//!   self-supervised training
//! - **Scoring**: calibration records and the serving-side
//!   [`pipeline::ScreeningEngine`]

pub mod adapters;
pub mod cache;
pub mod calibration;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod signal;
pub mod source;
pub mod types;
pub mod window;

pub use calibration::CalibrationRecord;
pub use error::ScreenError;
pub use pipeline::{fit_screening, ingest_video, PipelineConfig, ScreeningEngine};

// Schema exports
pub use types::{FrameRecord, InferenceRequest, InferenceResponse, ScreeningScore, FRAME_SCHEMA_VERSION};

// Ingestion exports
pub use quality::GateConfig;
pub use source::LandmarkSource;

/// Kinesia version embedded in persisted artifacts
pub const KINESIA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for persisted artifacts
pub const PRODUCER_NAME: &str = "kinesia";
