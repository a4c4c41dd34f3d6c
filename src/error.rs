//! Error types for Synheart Nudge

use thiserror::Error;

/// Errors that can occur while loading data, training, or exporting
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Numeric parse error: {0}")]
    NumericParseError(String),

    #[error("Invalid target value: {0}")]
    InvalidTarget(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Model is not fitted: {0}")]
    NotFitted(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}
