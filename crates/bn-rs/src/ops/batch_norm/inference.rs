use crate::backend::{ComputeBackend, DeviceScope, InferenceRequest, TensorDescriptor};
use crate::error::BatchNormResult;
use crate::tensor::Tensor;

use super::axis::{check_rank, resolve_mode};
use super::precision::cast_contiguous;
use super::validate::{ensure_colocated, ensure_eps, ensure_float, ensure_shape};

/// Normalizes `x` with fixed, externally supplied statistics.
///
/// Computes `gamma * (x - mean) / sqrt(var + eps) + beta` over the statistics implied by `axis`.
/// Stateless: none of the operands are mutated and nothing is saved for a backward pass.
#[allow(clippy::too_many_arguments)]
pub fn fixed_batch_norm<B: ComputeBackend + ?Sized>(
    backend: &B,
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mean: &Tensor,
    var: &Tensor,
    eps: f64,
    axis: &[usize],
) -> BatchNormResult<Tensor> {
    ensure_eps(backend, eps)?;
    let mode = resolve_mode(axis)?;
    check_rank(mode, axis, x.shape().rank())?;

    let reduced = x.shape().reduce_keepdims(axis);
    for (label, tensor) in [("gamma", gamma), ("beta", beta), ("mean", mean), ("var", var)] {
        ensure_shape(label, tensor, &reduced)?;
    }
    ensure_colocated(
        backend,
        ("x", x),
        &[("gamma", gamma), ("beta", beta), ("mean", mean), ("var", var)],
    )?;
    ensure_float(&[
        ("x", x),
        ("gamma", gamma),
        ("beta", beta),
        ("mean", mean),
        ("var", var),
    ])?;

    let _scope = DeviceScope::enter(x.device());

    let x_cont = cast_contiguous(x, None);
    let stats_dtype = backend
        .derive_statistics_descriptor(&TensorDescriptor::of(&x_cont), mode)?
        .dtype;
    let gamma = cast_contiguous(gamma, Some(stats_dtype));
    let beta = cast_contiguous(beta, Some(stats_dtype));
    let mean = cast_contiguous(mean, Some(stats_dtype));
    let var = cast_contiguous(var, Some(stats_dtype));
    log::debug!(
        "fixed batch norm: mode={mode} x={} {} stats={stats_dtype}",
        x.shape(),
        x.dtype()
    );

    let y = backend.forward_inference(InferenceRequest {
        mode,
        x: &x_cont,
        gamma: &gamma,
        beta: &beta,
        mean: &mean,
        var: &var,
        eps,
    })?;
    Ok(y)
}
