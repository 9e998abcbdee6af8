//! Batch-normalization operator engine.
//!
//! Orchestrates the three backend primitives: forward training with running-statistics updates,
//! backward from saved batch statistics, and stateless inference from fixed statistics. The
//! engine owns validation, precision reconciliation and forward/backward state; the arithmetic is
//! delegated to a [`ComputeBackend`].

mod axis;
mod context;
mod inference;
mod precision;
mod validate;

pub use axis::{check_rank, resolve_mode};
pub use context::{BatchNormContext, BatchNormGradients, ContextState, SavedActivations};
pub use inference::fixed_batch_norm;
pub use precision::{cast_contiguous, update_running};

pub(crate) use validate::{ensure_decay, ensure_eps};

use crate::backend::ComputeBackend;
use crate::error::BatchNormResult;
use crate::tensor::Tensor;

/// Creates a forward/backward context that updates `running_mean` and `running_var` in place.
///
/// The running buffers stay mutably borrowed until the context is dropped. Fails if `eps` is below
/// the backend minimum, `decay` lies outside `[0, 1]` or a running buffer is not contiguous.
pub fn batch_norm_forward_backward<'a, B: ComputeBackend + ?Sized>(
    backend: &'a B,
    running_mean: &'a mut Tensor,
    running_var: &'a mut Tensor,
    eps: f64,
    decay: f64,
    axis: &[usize],
) -> BatchNormResult<BatchNormContext<'a, B>> {
    BatchNormContext::new(backend, running_mean, running_var, eps, decay, axis)
}
