//! Error types for the calibration workspace

use thiserror::Error;

/// Calibration error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or malformed configuration (tables, working points, years).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A correction table rejected its inputs.
    #[error("Table error: {0}")]
    Table(String),

    /// Shape or content mismatch in event data.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure while computing a correction.
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
