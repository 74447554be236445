//! Error type for table and container I/O.

use thiserror::Error;

/// Error type for heliox I/O operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet decode/encode error.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Container (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required column absent from the input table.
    #[error("missing required column: {0}")]
    MissingColumn(String),

    /// Column present but not convertible to the expected type.
    #[error("column '{col}' has unsupported type {actual}")]
    WrongType {
        /// Column name.
        col: String,
        /// Observed Arrow type.
        actual: String,
    },

    /// Container path does not resolve to an object.
    #[error("missing container entry: {0}")]
    MissingEntry(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, IoError>;
