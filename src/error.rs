//! Error types for the timely evaluation harness

use thiserror::Error;

/// Result type alias for timely operations
pub type Result<T> = std::result::Result<T, TimelyError>;

/// Main error type
#[derive(Error, Debug)]
pub enum TimelyError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("{0} does not exist")]
    UnknownModel(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{model} does not support {operation}")]
    Unsupported {
        model: String,
        operation: String,
    },
}

impl TimelyError {
    pub(crate) fn invalid_parameter(
        name: &str,
        value: impl ToString,
        reason: &str,
    ) -> Self {
        TimelyError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for TimelyError {
    fn from(err: polars::error::PolarsError) -> Self {
        TimelyError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for TimelyError {
    fn from(err: serde_json::Error) -> Self {
        TimelyError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TimelyError {
    fn from(err: ndarray::ShapeError) -> Self {
        TimelyError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
