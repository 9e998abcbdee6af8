//! Error taxonomy of the batch-normalization engine.

use thiserror::Error;

use crate::backend::BackendError;

/// Copyable discriminant of [`BatchNormError`], convenient for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAxis,
    DimensionMismatch,
    Contiguity,
    PrecisionConfiguration,
    DeviceMismatch,
    InvalidState,
    BackendCompute,
}

/// Failure of a batch-normalization operation. None of these are retried by the engine.
#[derive(Debug, Error)]
pub enum BatchNormError {
    #[error("invalid axis {axis:?} for batch normalization: {reason}")]
    InvalidAxis { axis: Vec<usize>, reason: String },
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("contiguity error: {0}")]
    Contiguity(String),
    #[error("precision configuration error: {0}")]
    PrecisionConfiguration(String),
    #[error("device mismatch: {0}")]
    DeviceMismatch(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl BatchNormError {
    pub fn invalid_axis(axis: &[usize], reason: impl Into<String>) -> Self {
        BatchNormError::InvalidAxis {
            axis: axis.to_vec(),
            reason: reason.into(),
        }
    }

    pub fn dimension_mismatch(message: impl Into<String>) -> Self {
        BatchNormError::DimensionMismatch(message.into())
    }

    pub fn contiguity(message: impl Into<String>) -> Self {
        BatchNormError::Contiguity(message.into())
    }

    pub fn precision(message: impl Into<String>) -> Self {
        BatchNormError::PrecisionConfiguration(message.into())
    }

    pub fn device_mismatch(message: impl Into<String>) -> Self {
        BatchNormError::DeviceMismatch(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        BatchNormError::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchNormError::InvalidAxis { .. } => ErrorKind::InvalidAxis,
            BatchNormError::DimensionMismatch(_) => ErrorKind::DimensionMismatch,
            BatchNormError::Contiguity(_) => ErrorKind::Contiguity,
            BatchNormError::PrecisionConfiguration(_) => ErrorKind::PrecisionConfiguration,
            BatchNormError::DeviceMismatch(_) => ErrorKind::DeviceMismatch,
            BatchNormError::InvalidState(_) => ErrorKind::InvalidState,
            BatchNormError::Backend(_) => ErrorKind::BackendCompute,
        }
    }
}

/// Result alias used by every engine entry point.
pub type BatchNormResult<T> = Result<T, BatchNormError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_convert_and_keep_their_message() {
        let err: BatchNormError = BackendError::execution("out of memory").into();
        assert_eq!(err.kind(), ErrorKind::BackendCompute);
        assert_eq!(err.to_string(), "backend execution failure: out of memory");
    }

    #[test]
    fn invalid_axis_names_the_axis() {
        let err = BatchNormError::invalid_axis(&[0, 1], "expected (0,)");
        assert_eq!(
            err.to_string(),
            "invalid axis [0, 1] for batch normalization: expected (0,)"
        );
    }
}
