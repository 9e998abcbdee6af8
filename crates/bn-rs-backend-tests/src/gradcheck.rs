//! Finite-difference checks of the forward/backward pair.

use std::sync::Arc;

use bn_rs::backend::ComputeBackend;
use bn_rs::ops::batch_norm::{batch_norm_forward_backward, BatchNormGradients};
use bn_rs::tensor::{DType, Tensor};

use crate::common::{assert_close_tol, random_tensor, random_vec, seeded_rng, tensor, Params};

const EPS: f64 = 1e-5;
const STEP: f64 = 1e-5;

/// `sum(weights * y)` for one fresh forward pass.
fn weighted_output<B: ComputeBackend + ?Sized>(
    backend: &B,
    x: &Tensor,
    params: &Params,
    axis: &[usize],
    weights: &[f64],
) -> f64 {
    let mut running_mean = params.running_mean.clone();
    let mut running_var = params.running_var.clone();
    let mut ctx =
        batch_norm_forward_backward(backend, &mut running_mean, &mut running_var, EPS, 0.9, axis)
            .unwrap();
    let y = ctx.forward(x, &params.gamma, &params.beta).unwrap();
    y.to_f64_vec().iter().zip(weights).map(|(y, w)| y * w).sum()
}

fn analytic_gradients<B: ComputeBackend + ?Sized>(
    backend: &B,
    x: &Tensor,
    params: &Params,
    axis: &[usize],
    gout: &Tensor,
) -> BatchNormGradients {
    let mut running_mean = params.running_mean.clone();
    let mut running_var = params.running_var.clone();
    let mut ctx =
        batch_norm_forward_backward(backend, &mut running_mean, &mut running_var, EPS, 0.9, axis)
            .unwrap();
    ctx.forward(x, &params.gamma, &params.beta).unwrap();
    ctx.backward(gout).unwrap()
}

/// Central difference of `f` with respect to every element of `values`.
fn numeric_gradient(values: &[f64], mut f: impl FnMut(&[f64]) -> f64) -> Vec<f64> {
    let mut perturbed = values.to_vec();
    (0..values.len())
        .map(|i| {
            let original = perturbed[i];
            perturbed[i] = original + STEP;
            let plus = f(&perturbed);
            perturbed[i] = original - STEP;
            let minus = f(&perturbed);
            perturbed[i] = original;
            (plus - minus) / (2.0 * STEP)
        })
        .collect()
}

fn check_gradients<B: ComputeBackend + ?Sized>(backend: &B, dims: &[usize], axis: &[usize], seed: u64) {
    let mut rng = seeded_rng(seed);
    let x = random_tensor(&mut rng, dims, DType::F64, -2.0, 2.0);
    let params = Params::random(&mut rng, dims, axis, DType::F64);
    let weights = random_vec(&mut rng, x.len(), -1.0, 1.0);
    let gout = tensor(dims, DType::F64, &weights);

    let grads = analytic_gradients(backend, &x, &params, axis, &gout);
    assert_eq!(grads.gx.shape(), x.shape());
    assert_eq!(grads.ggamma.shape(), params.gamma.shape());
    assert_eq!(grads.gbeta.shape(), params.beta.shape());

    let gx = numeric_gradient(&x.to_f64_vec(), |perturbed| {
        weighted_output(backend, &tensor(dims, DType::F64, perturbed), &params, axis, &weights)
    });
    assert_close_tol(&gx, &grads.gx.to_f64_vec(), 1e-6, 1e-5);

    let stats_dims = params.gamma.shape().dims().to_vec();
    let ggamma = numeric_gradient(&params.gamma.to_f64_vec(), |perturbed| {
        let params = Params {
            gamma: tensor(&stats_dims, DType::F64, perturbed),
            beta: params.beta.clone(),
            running_mean: params.running_mean.clone(),
            running_var: params.running_var.clone(),
        };
        weighted_output(backend, &x, &params, axis, &weights)
    });
    assert_close_tol(&ggamma, &grads.ggamma.to_f64_vec(), 1e-6, 1e-5);

    let gbeta = numeric_gradient(&params.beta.to_f64_vec(), |perturbed| {
        let params = Params {
            gamma: params.gamma.clone(),
            beta: tensor(&stats_dims, DType::F64, perturbed),
            running_mean: params.running_mean.clone(),
            running_var: params.running_var.clone(),
        };
        weighted_output(backend, &x, &params, axis, &weights)
    });
    assert_close_tol(&gbeta, &grads.gbeta.to_f64_vec(), 1e-6, 1e-5);
}

pub fn per_activation_gradients_match_finite_differences<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    check_gradients(backend.as_ref(), &[5, 3], &[0], 21);
}

pub fn spatial_gradients_match_finite_differences<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    check_gradients(backend.as_ref(), &[2, 3, 2, 2], &[0, 2, 3], 22);
}

/// Gradients for operands rounded to `dtype`, computed once in `dtype` and once in `F64`.
///
/// Rounding the operands first makes both runs differentiate the same function, so any
/// difference comes from the reduced-precision path alone.
fn gradients_against_double<B: ComputeBackend + ?Sized>(
    backend: &B,
    dtype: DType,
    dims: &[usize],
    axis: &[usize],
    seed: u64,
) -> (BatchNormGradients, BatchNormGradients) {
    let mut rng = seeded_rng(seed);
    let x = random_tensor(&mut rng, dims, DType::F64, -2.0, 2.0).astype(dtype);
    let gout = random_tensor(&mut rng, dims, DType::F64, -1.0, 1.0).astype(dtype);
    let params = Params::random(&mut rng, dims, axis, DType::F64);
    let reduced = Params {
        gamma: params.gamma.astype(dtype),
        beta: params.beta.astype(dtype),
        running_mean: params.running_mean.astype(dtype),
        running_var: params.running_var.astype(dtype),
    };
    let widened = Params {
        gamma: reduced.gamma.astype(DType::F64),
        beta: reduced.beta.astype(DType::F64),
        running_mean: reduced.running_mean.astype(DType::F64),
        running_var: reduced.running_var.astype(DType::F64),
    };

    let low = analytic_gradients(backend, &x, &reduced, axis, &gout);
    let high = analytic_gradients(
        backend,
        &x.astype(DType::F64),
        &widened,
        axis,
        &gout.astype(DType::F64),
    );
    assert_eq!(low.gx.dtype(), dtype);
    assert_eq!(low.ggamma.dtype(), dtype);
    assert_eq!(low.gbeta.dtype(), dtype);
    (low, high)
}

/// Single-precision gradients agree with double-precision ones within single-precision error.
pub fn single_precision_gradients_track_double_precision<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let (single, double) =
        gradients_against_double(backend.as_ref(), DType::F32, &[6, 2, 3, 3], &[0, 2, 3], 23);
    assert_close_tol(&double.gx.to_f64_vec(), &single.gx.to_f64_vec(), 1e-4, 1e-3);
    assert_close_tol(&double.ggamma.to_f64_vec(), &single.ggamma.to_f64_vec(), 1e-4, 1e-3);
    assert_close_tol(&double.gbeta.to_f64_vec(), &single.gbeta.to_f64_vec(), 1e-4, 1e-3);
}

/// F16 and BF16 gradients, cast back to the parameter dtype, stay within a few ulps of `F64`.
pub fn half_precision_gradients_track_double_precision<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    for (dtype, seed) in [(DType::F16, 24), (DType::BF16, 25)] {
        let (half, double) =
            gradients_against_double(backend.as_ref(), dtype, &[4, 6], &[0], seed);
        let tol = 4.0 * dtype.epsilon();
        assert_close_tol(&double.gx.to_f64_vec(), &half.gx.to_f64_vec(), tol, tol);
        assert_close_tol(&double.ggamma.to_f64_vec(), &half.ggamma.to_f64_vec(), tol, tol);
        assert_close_tol(&double.gbeta.to_f64_vec(), &half.gbeta.to_f64_vec(), tol, tol);
    }
}
