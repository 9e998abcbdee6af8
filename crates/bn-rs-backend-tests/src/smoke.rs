use std::sync::Arc;

use approx::assert_relative_eq;
use bn_rs::backend::ComputeBackend;
use bn_rs::nn::BatchNorm;
use bn_rs::ops::batch_norm::{batch_norm_forward_backward, fixed_batch_norm, ContextState};
use bn_rs::tensor::{DType, Shape};
use bn_rs::BatchNormConfig;

use crate::common::{
    assert_close, assert_close_tol, random_tensor, reference_moments, reference_normalize,
    seeded_rng, Params,
};

const EPS: f64 = 2e-5;

pub fn spatial_forward_normalizes_channels<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(42);
    let dims = [2, 3, 4, 4];
    let axis = [0, 2, 3];
    let x = random_tensor(&mut rng, &dims, DType::F32, -2.0, 5.0);
    let mut params = Params::identity(&dims, &axis, DType::F32);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    assert_eq!(ctx.state(), ContextState::Uninitialized);
    let y = ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    assert_eq!(ctx.state(), ContextState::Forwarded);
    assert_eq!(y.shape(), x.shape());
    assert_eq!(y.dtype(), DType::F32);
    assert_eq!(params.gamma.shape(), &Shape::new([1, 3, 1, 1]));

    let (y_mean, y_var, _) = reference_moments(&y.to_f64_vec(), &dims, &axis);
    assert_close_tol(&[0.0; 3], &y_mean, 1e-5, 0.0);
    assert_close_tol(&[1.0; 3], &y_var, 1e-3, 0.0);
    drop(ctx);

    let (mean, var, count) = reference_moments(&x.to_f64_vec(), &dims, &axis);
    let unbiased = count as f64 / (count as f64 - 1.0);
    let expected_mean = mean.iter().map(|m| 0.1 * m).collect::<Vec<_>>();
    let expected_var = var
        .iter()
        .map(|v| 0.9 + 0.1 * v * unbiased)
        .collect::<Vec<_>>();
    assert_close_tol(&expected_mean, &params.running_mean.to_f64_vec(), 1e-5, 1e-5);
    assert_close_tol(&expected_var, &params.running_var.to_f64_vec(), 1e-5, 1e-5);
}

pub fn per_activation_forward_matches_reference<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(7);
    let dims = [8, 5];
    let axis = [0];
    let x = random_tensor(&mut rng, &dims, DType::F64, -3.0, 3.0);
    let mut params = Params::random(&mut rng, &dims, &axis, DType::F64);
    assert_eq!(params.gamma.shape(), &Shape::new([1, 5]));

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    let y = ctx.forward(&x, &params.gamma, &params.beta).unwrap();

    let values = x.to_f64_vec();
    let (mean, var, _) = reference_moments(&values, &dims, &axis);
    let expected = reference_normalize(
        &values,
        &dims,
        &axis,
        &params.gamma.to_f64_vec(),
        &params.beta.to_f64_vec(),
        &mean,
        &var,
        EPS,
    );
    assert_close(&expected, &y.to_f64_vec());

    let saved = ctx.saved().expect("forward saves activations");
    assert_close(&mean, &saved.batch_mean().to_f64_vec());
    let expected_inv_std = var
        .iter()
        .map(|v| 1.0 / (v + EPS).sqrt())
        .collect::<Vec<_>>();
    assert_close(&expected_inv_std, &saved.batch_inv_std().to_f64_vec());
    assert_eq!(saved.beta_dtype(), DType::F64);
}

pub fn volumetric_forward_uses_spatial_statistics<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(11);
    let dims = [2, 2, 2, 3, 2];
    let axis = [0, 2, 3, 4];
    let x = random_tensor(&mut rng, &dims, DType::F64, 0.0, 4.0);
    let mut params = Params::identity(&dims, &axis, DType::F64);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.5,
        &axis,
    )
    .unwrap();
    let y = ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    let (y_mean, _, _) = reference_moments(&y.to_f64_vec(), &dims, &axis);
    assert_close_tol(&[0.0, 0.0], &y_mean, 1e-9, 0.0);
}

pub fn inference_uses_fixed_statistics<B: ComputeBackend + ?Sized + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(3);
    let dims = [4, 3, 2, 2];
    let axis = [0, 2, 3];
    let x = random_tensor(&mut rng, &dims, DType::F32, -1.0, 1.0);
    let params = Params::random(&mut rng, &dims, &axis, DType::F32);
    let mean = random_tensor(&mut rng, &[1, 3, 1, 1], DType::F32, -0.5, 0.5);
    let var = random_tensor(&mut rng, &[1, 3, 1, 1], DType::F32, 0.5, 2.0);
    let x_before = x.to_f64_vec();
    let mean_before = mean.to_f64_vec();

    let y = fixed_batch_norm(
        backend.as_ref(),
        &x,
        &params.gamma,
        &params.beta,
        &mean,
        &var,
        EPS,
        &axis,
    )
    .unwrap();

    let expected = reference_normalize(
        &x_before,
        &dims,
        &axis,
        &params.gamma.to_f64_vec(),
        &params.beta.to_f64_vec(),
        &mean_before,
        &var.to_f64_vec(),
        EPS,
    );
    assert_close_tol(&expected, &y.to_f64_vec(), 1e-5, 1e-5);
    assert_eq!(x.to_f64_vec(), x_before);
    assert_eq!(mean.to_f64_vec(), mean_before);
}

pub fn half_precision_running_stats_are_written_back<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(5);
    let dims = [4, 6];
    let axis = [0];
    let x = random_tensor(&mut rng, &dims, DType::F16, 1.0, 3.0);
    let mut params = Params::identity(&dims, &axis, DType::F16);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    let y = ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    assert_eq!(y.dtype(), DType::F16);
    let batch_mean = ctx
        .saved()
        .expect("forward saves activations")
        .batch_mean()
        .to_f64_vec();
    drop(ctx);

    assert_eq!(params.running_mean.dtype(), DType::F16);
    assert_eq!(params.running_var.dtype(), DType::F16);
    for (running, batch) in params.running_mean.to_f64_vec().iter().zip(&batch_mean) {
        assert_relative_eq!(*running, 0.1 * batch, max_relative = 2e-3);
    }
}

pub fn layer_trains_then_infers<B: ComputeBackend + ?Sized + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(9);
    let dims = [16, 4];
    let mut layer = BatchNorm::new(
        Arc::clone(backend),
        Shape::new([1, 4]),
        DType::F32,
        BatchNormConfig {
            decay: 0.0,
            ..BatchNormConfig::dense()
        },
    )
    .unwrap();
    let x = random_tensor(&mut rng, &dims, DType::F32, -1.0, 1.0);

    let (y_train, ctx) = layer.forward_train(&x).unwrap();
    let grads = ctx.backward(&y_train).unwrap();
    assert_eq!(grads.gx.shape(), x.shape());
    assert_eq!(grads.ggamma.shape(), &Shape::new([1, 4]));
    drop(ctx);

    // With decay 0 the running statistics are exactly the last batch's, up to the unbiased
    // correction of the variance.
    let y_infer = layer.forward_inference(&x).unwrap();
    let (mean, var, count) = reference_moments(&x.to_f64_vec(), &dims, &[0]);
    let unbiased = var
        .iter()
        .map(|v| v * count as f64 / (count as f64 - 1.0))
        .collect::<Vec<_>>();
    let expected = reference_normalize(
        &x.to_f64_vec(),
        &dims,
        &[0],
        &[1.0; 4],
        &[0.0; 4],
        &mean,
        &unbiased,
        layer.config().eps,
    );
    assert_close_tol(&expected, &y_infer.to_f64_vec(), 1e-5, 1e-4);
}
