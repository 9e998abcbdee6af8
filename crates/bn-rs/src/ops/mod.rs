//! High-level operations layered on top of the tensor and backend abstractions.
//!
//! Operations stay backend-agnostic: they validate and prepare operands, then hand them to a
//! [`ComputeBackend`](crate::backend::ComputeBackend) implementation.
pub mod batch_norm;

pub use batch_norm::{
    batch_norm_forward_backward, fixed_batch_norm, BatchNormContext, BatchNormGradients,
    ContextState, SavedActivations,
};
