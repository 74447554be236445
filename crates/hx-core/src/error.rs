//! Error types for heliox

use thiserror::Error;

/// heliox error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (detected before any data is read)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input error (missing file, schema mismatch)
    #[error("Input error: {0}")]
    Input(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
