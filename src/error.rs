//! Error types for the kinesia pipeline

use thiserror::Error;

/// Errors that can occur during screening computation.
///
/// Recoverable data-quality conditions (unusable video, too few windows)
/// are reported as status values on pipeline outputs, not as errors.
/// Everything here indicates caller misuse or a genuinely broken input.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("Failed to parse session payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unknown task name: {0}")]
    UnknownTask(String),

    #[error("Tensor shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Calibration error: {0}")]
    CalibrationError(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Cache error: {0}")]
    CacheError(String),
}
