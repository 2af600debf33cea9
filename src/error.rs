//! Error types for the pipetune crate

use thiserror::Error;

/// Result type alias for pipetune operations
pub type Result<T> = std::result::Result<T, PipetuneError>;

/// Main error type for pipeline assembly, evaluation and search
#[derive(Error, Debug)]
pub enum PipetuneError {
    /// The dataset cannot be used: missing fields, misaligned rows, or a
    /// target whose type is neither integer-coded nor continuous.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A search-space entry is structurally malformed.
    #[error("Invalid search space: {0}")]
    InvalidSearchSpace(String),

    /// A candidate parameter cannot be applied to the assembled pipeline.
    #[error("Invalid pipeline parameters: {0}")]
    InvalidPipelineParams(String),

    /// Cross-validation failed at fit or score time. Recoverable: the
    /// evaluator converts this into a worst-possible-score result.
    #[error("Evaluation failure: {0}")]
    EvaluationFailure(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for PipetuneError {
    fn from(err: polars::error::PolarsError) -> Self {
        PipetuneError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for PipetuneError {
    fn from(err: serde_json::Error) -> Self {
        PipetuneError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipetuneError::InvalidInput("target has string dtype".to_string());
        assert_eq!(err.to_string(), "Invalid input: target has string dtype");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipetuneError = io_err.into();
        assert!(matches!(err, PipetuneError::IoError(_)));
    }
}
