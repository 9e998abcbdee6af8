use std::sync::Arc;

use approx::assert_abs_diff_eq;
use bn_rs::backend::ComputeBackend;
use bn_rs::ops::batch_norm::batch_norm_forward_backward;
use bn_rs::tensor::{DType, Shape, Tensor};

use crate::common::{seeded_rng, tensor, Params};

pub fn decay_recurrence_holds_for_known_batch<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    // Batch mean 4, biased variance 5, unbiased variance 20/3.
    let x = tensor(&[4, 1], DType::F64, &[1.0, 3.0, 5.0, 7.0]);
    let mut params = Params::identity(&[4, 1], &[0], DType::F64);
    params.running_mean.fill(2.0);
    params.running_var.fill(3.0);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        1e-5,
        0.75,
        &[0],
    )
    .unwrap();
    ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    drop(ctx);

    assert_abs_diff_eq!(params.running_mean.to_f64_vec()[0], 2.5, epsilon = 1e-12);
    assert_abs_diff_eq!(
        params.running_var.to_f64_vec()[0],
        0.75 * 3.0 + 0.25 * 20.0 / 3.0,
        epsilon = 1e-12
    );
}

pub fn running_statistics_converge_to_population<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(1234);
    let dims = [64, 2];
    let mut params = Params::identity(&dims, &[0], DType::F64);

    for _ in 0..200 {
        let x = Tensor::randn(Shape::new(dims), DType::F64, 3.0, 2.0, &mut rng);
        let mut ctx = batch_norm_forward_backward(
            backend.as_ref(),
            &mut params.running_mean,
            &mut params.running_var,
            2e-5,
            0.9,
            &[0],
        )
        .unwrap();
        ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    }

    for mean in params.running_mean.to_f64_vec() {
        assert_abs_diff_eq!(mean, 3.0, epsilon = 0.3);
    }
    for var in params.running_var.to_f64_vec() {
        assert_abs_diff_eq!(var, 4.0, epsilon = 0.8);
    }
}

pub fn decay_one_keeps_running_statistics<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(77);
    let dims = [4, 3, 2, 2];
    let axis = [0, 2, 3];
    let mut params = Params::identity(&dims, &axis, DType::F32);
    params.running_mean.fill(0.25);
    let x = Tensor::randn(Shape::new(dims), DType::F32, 1.0, 1.0, &mut rng);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        2e-5,
        1.0,
        &axis,
    )
    .unwrap();
    ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    drop(ctx);

    assert_eq!(params.running_mean.to_f64_vec(), vec![0.25; 3]);
    assert_eq!(params.running_var.to_f64_vec(), vec![1.0; 3]);
}
