//! Error types for the attribution engine

use thiserror::Error;

/// Result type alias for attribution operations
pub type Result<T> = std::result::Result<T, AttributionError>;

/// Main error type for the attribution engine
#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Insufficient data: {usable} usable rows, at least {required} required")]
    InsufficientData { usable: usize, required: usize },

    #[error("Model fit error: {0}")]
    ModelFit(String),

    #[error("Batch {batch} failed: {reason}")]
    BatchComputation { batch: usize, reason: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttributionError {
    /// Errors that invalidate the additivity of a result and must stop the request.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AttributionError::BatchComputation { .. } | AttributionError::Cache(_)
        )
    }

    pub(crate) fn invalid_parameter(
        name: &str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        AttributionError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<polars::error::PolarsError> for AttributionError {
    fn from(err: polars::error::PolarsError) -> Self {
        AttributionError::Data(err.to_string())
    }
}

impl From<serde_json::Error> for AttributionError {
    fn from(err: serde_json::Error) -> Self {
        AttributionError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for AttributionError {
    fn from(err: bincode::Error) -> Self {
        AttributionError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for AttributionError {
    fn from(err: ndarray::ShapeError) -> Self {
        AttributionError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AttributionError {
    fn from(err: redis::RedisError) -> Self {
        AttributionError::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AttributionError::InsufficientData { usable: 3, required: 10 };
        assert_eq!(
            err.to_string(),
            "Insufficient data: 3 usable rows, at least 10 required"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AttributionError = io_err.into();
        assert!(matches!(err, AttributionError::Io(_)));
    }

    #[test]
    fn test_fatality() {
        assert!(AttributionError::ModelFit("all failed".into()).is_fatal());
        assert!(!AttributionError::Cache("down".into()).is_fatal());
        assert!(!AttributionError::BatchComputation { batch: 2, reason: "nan".into() }.is_fatal());
    }
}
