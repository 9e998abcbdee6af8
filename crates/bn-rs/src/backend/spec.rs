//! Compute backend capability consumed by the batch-normalization engine.
//!
//! A backend owns the fused reduction/normalization arithmetic. The engine only orchestrates:
//! it validates preconditions, reconciles precisions and keeps forward state, then hands fully
//! prepared, contiguous operands to one of the three primitives declared here.

use std::fmt;

use thiserror::Error;

use crate::tensor::{DType, Device, Shape, Tensor};

/// Which elements share one normalization statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchNormMode {
    /// Every element position except the batch axis gets its own statistic.
    PerActivation,
    /// Statistics are shared across all spatial positions of a channel (axis 1).
    Spatial,
}

impl BatchNormMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchNormMode::PerActivation => "per-activation",
            BatchNormMode::Spatial => "spatial",
        }
    }

    /// Axes reduced for an input of rank `rank`: the batch axis, plus every axis after the channel
    /// axis in spatial mode.
    pub fn reduction_axes(self, rank: usize) -> Vec<usize> {
        match self {
            BatchNormMode::PerActivation => vec![0],
            BatchNormMode::Spatial => std::iter::once(0).chain(2..rank).collect(),
        }
    }
}

impl fmt::Display for BatchNormMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape and dtype of a tensor as seen by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorDescriptor {
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn of(tensor: &Tensor) -> Self {
        Self::new(tensor.shape().clone(), tensor.dtype())
    }
}

/// Operands of the forward-training primitive. Every tensor is contiguous and co-located.
#[derive(Debug, Clone, Copy)]
pub struct TrainingRequest<'a> {
    pub mode: BatchNormMode,
    pub x: &'a Tensor,
    pub gamma: &'a Tensor,
    pub beta: &'a Tensor,
    /// Weight of the batch statistic in the running update, `1 - decay`.
    pub momentum: f64,
    pub eps: f64,
}

/// Results of the forward-training primitive.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub output: Tensor,
    pub batch_mean: Tensor,
    pub batch_inv_std: Tensor,
}

/// Operands of the forward-inference primitive.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub mode: BatchNormMode,
    pub x: &'a Tensor,
    pub gamma: &'a Tensor,
    pub beta: &'a Tensor,
    pub mean: &'a Tensor,
    pub var: &'a Tensor,
    pub eps: f64,
}

/// Operands of the backward primitive.
#[derive(Debug, Clone, Copy)]
pub struct BackwardRequest<'a> {
    pub mode: BatchNormMode,
    pub x: &'a Tensor,
    pub gout: &'a Tensor,
    pub gamma: &'a Tensor,
    pub batch_mean: &'a Tensor,
    pub batch_inv_std: &'a Tensor,
    pub eps: f64,
}

/// Gradients produced by the backward primitive, in canonical statistics precision.
#[derive(Debug, Clone)]
pub struct BackwardOutput {
    pub gx: Tensor,
    pub ggamma: Tensor,
    pub gbeta: Tensor,
}

/// Backend error surfaced to higher layers.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} is not supported: {reason}")]
    Unsupported { op: &'static str, reason: String },
    #[error("invalid argument to {op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unsupported(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unsupported {
            op,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::InvalidArgument {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Batch-normalization compute capability implemented once per device family.
///
/// Backends may assume the engine already checked shapes, devices, dtype kinds, contiguity and the
/// epsilon floor; they still report anything they cannot execute through [`BackendError`].
pub trait ComputeBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"cpu-reference"`, `"cuda"`).
    fn backend_name(&self) -> &str;

    /// Whether tensors living on `device` can be processed by this backend.
    fn supports_device(&self, device: Device) -> bool;

    /// Smallest `eps` the backend accepts.
    fn minimum_epsilon(&self) -> f64;

    /// Derives the descriptor of gamma/beta/mean/var for an input descriptor and mode.
    ///
    /// The returned dtype is the canonical statistics precision every parameter and saved
    /// statistic must be converted to before calling the primitives below.
    fn derive_statistics_descriptor(
        &self,
        input: &TensorDescriptor,
        mode: BatchNormMode,
    ) -> BackendResult<TensorDescriptor>;

    /// Computes the normalized output and batch statistics.
    ///
    /// `running_mean` and `running_var` hold the canonical statistics dtype and are updated in
    /// place as `running = (1 - momentum) * running + momentum * batch_stat`.
    fn forward_training(
        &self,
        request: TrainingRequest<'_>,
        running_mean: &mut Tensor,
        running_var: &mut Tensor,
    ) -> BackendResult<TrainingOutput>;

    /// Normalizes with fixed statistics; never mutates its operands.
    fn forward_inference(&self, request: InferenceRequest<'_>) -> BackendResult<Tensor>;

    /// Computes `(gx, ggamma, gbeta)` from saved batch statistics.
    fn backward(&self, request: BackwardRequest<'_>) -> BackendResult<BackwardOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spatial_mode_reduces_all_but_channels() {
        assert_eq!(BatchNormMode::Spatial.reduction_axes(4), vec![0, 2, 3]);
        assert_eq!(BatchNormMode::Spatial.reduction_axes(5), vec![0, 2, 3, 4]);
        assert_eq!(BatchNormMode::PerActivation.reduction_axes(4), vec![0]);
    }
}
