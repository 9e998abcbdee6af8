use std::sync::Arc;

use bn_rs::backend::{current_device, ComputeBackend};
use bn_rs::ops::batch_norm::{
    batch_norm_forward_backward, fixed_batch_norm, BatchNormContext, ContextState,
};
use bn_rs::tensor::{DType, Device, Shape, Tensor};
use bn_rs::ErrorKind;

use crate::common::{assert_close, random_tensor, seeded_rng, tensor, Params};
use crate::recording_backend::{RecordedCall, RecordingBackend};

const EPS: f64 = 2e-5;

fn strided_view(len: usize) -> Tensor {
    let base = Tensor::zeros(Shape::new([2, len / 2]), DType::F32);
    let view = base.permute(&[1, 0]).unwrap();
    assert!(!view.is_contiguous());
    view
}

pub fn backward_before_forward_is_rejected<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut params = Params::identity(&[4, 3], &[0], DType::F32);
    let ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &[0],
    )
    .unwrap();
    let gout = Tensor::zeros(Shape::new([4, 3]), DType::F32);
    let err = ctx.backward(&gout).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(ctx.state(), ContextState::Uninitialized);
}

pub fn backward_is_repeatable<B: ComputeBackend + ?Sized + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(31);
    let dims = [3, 2, 2, 2];
    let axis = [0, 2, 3];
    let x = random_tensor(&mut rng, &dims, DType::F64, -1.0, 1.0);
    let mut params = Params::random(&mut rng, &dims, &axis, DType::F64);
    let g1 = random_tensor(&mut rng, &dims, DType::F64, -1.0, 1.0);
    let g2 = random_tensor(&mut rng, &dims, DType::F64, -1.0, 1.0);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    let saved_mean = ctx.saved().unwrap().batch_mean().to_f64_vec();

    let first = ctx.backward(&g1).unwrap();
    let second = ctx.backward(&g2).unwrap();
    let again = ctx.backward(&g1).unwrap();
    assert_eq!(first.gx.to_f64_vec(), again.gx.to_f64_vec());
    assert_eq!(first.ggamma.to_f64_vec(), again.ggamma.to_f64_vec());
    assert_ne!(first.gx.to_f64_vec(), second.gx.to_f64_vec());
    assert_eq!(ctx.saved().unwrap().batch_mean().to_f64_vec(), saved_mean);

    // Backward is linear in gout.
    let sum = tensor(
        &dims,
        DType::F64,
        &g1.to_f64_vec()
            .iter()
            .zip(g2.to_f64_vec())
            .map(|(a, b)| a + b)
            .collect::<Vec<_>>(),
    );
    let combined = ctx.backward(&sum).unwrap();
    let expected = first
        .gx
        .to_f64_vec()
        .iter()
        .zip(second.gx.to_f64_vec())
        .map(|(a, b)| a + b)
        .collect::<Vec<_>>();
    assert_close(&expected, &combined.gx.to_f64_vec());
}

pub fn repeated_forward_replaces_saved_state<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut params = Params::identity(&[2, 1], &[0], DType::F64);
    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &[0],
    )
    .unwrap();
    ctx.forward(&tensor(&[2, 1], DType::F64, &[0.0, 2.0]), &params.gamma, &params.beta)
        .unwrap();
    ctx.forward(&tensor(&[2, 1], DType::F64, &[4.0, 8.0]), &params.gamma, &params.beta)
        .unwrap();
    assert_eq!(ctx.saved().unwrap().batch_mean().to_f64_vec(), vec![6.0]);
    assert_eq!(ctx.saved().unwrap().x().to_f64_vec(), vec![4.0, 8.0]);
}

pub fn epsilon_below_minimum_is_rejected<B: ComputeBackend + ?Sized + 'static>(backend: &Arc<B>) {
    let eps = backend.minimum_epsilon() / 2.0;
    // Strided running statistics would also be rejected; the epsilon check comes first.
    let mut running_mean = strided_view(6);
    let mut running_var = strided_view(6);
    let err = batch_norm_forward_backward(
        backend.as_ref(),
        &mut running_mean,
        &mut running_var,
        eps,
        0.9,
        &[0],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrecisionConfiguration);
    assert!(err.to_string().contains("minimum allowed epsilon"));

    let x = Tensor::zeros(Shape::new([2, 3]), DType::F32);
    let params = Params::identity(&[2, 3], &[0], DType::F32);
    let err = fixed_batch_norm(
        backend.as_ref(),
        &x,
        &params.gamma,
        &params.beta,
        &params.running_mean,
        &params.running_var,
        eps,
        &[0, 5],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrecisionConfiguration);
}

pub fn strided_running_statistics_are_rejected<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut strided = strided_view(6);
    let mut contiguous = Tensor::zeros(Shape::new([6]), DType::F32);
    let err = batch_norm_forward_backward(
        backend.as_ref(),
        &mut strided,
        &mut contiguous,
        EPS,
        0.9,
        &[0],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Contiguity);
    assert!(err.to_string().contains("running mean"));

    let mut strided = strided_view(6);
    let err = batch_norm_forward_backward(
        backend.as_ref(),
        &mut contiguous,
        &mut strided,
        EPS,
        0.9,
        &[0],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Contiguity);
    assert!(err.to_string().contains("running variance"));
}

pub fn decay_outside_unit_interval_is_rejected<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut params = Params::identity(&[2, 3], &[0], DType::F32);
    for decay in [-0.1, 1.5, f64::NAN] {
        let err = batch_norm_forward_backward(
            backend.as_ref(),
            &mut params.running_mean,
            &mut params.running_var,
            EPS,
            decay,
            &[0],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrecisionConfiguration, "decay {decay}");
    }
}

fn forward_err<B: ComputeBackend + ?Sized>(
    ctx: &mut BatchNormContext<'_, B>,
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
) -> ErrorKind {
    ctx.forward(x, gamma, beta).unwrap_err().kind()
}

pub fn malformed_forward_inputs_leave_state_untouched<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let dims = [2, 3, 2, 2];
    let mut params = Params::identity(&dims, &[0, 2, 3], DType::F32);
    params.running_mean.fill(0.5);
    let x = Tensor::full(Shape::new(dims), DType::F32, 1.0);

    let mut bad_axis = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &[0, 1],
    )
    .unwrap();
    assert_eq!(
        forward_err(&mut bad_axis, &x, &params.gamma, &params.beta),
        ErrorKind::InvalidAxis
    );
    drop(bad_axis);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &[0, 2, 3],
    )
    .unwrap();

    let rank3 = Tensor::full(Shape::new([2, 3, 4]), DType::F32, 1.0);
    assert_eq!(
        forward_err(&mut ctx, &rank3, &params.gamma, &params.beta),
        ErrorKind::InvalidAxis
    );

    let wrong_gamma = Tensor::full(Shape::new([1, 4, 1, 1]), DType::F32, 1.0);
    assert_eq!(
        forward_err(&mut ctx, &x, &wrong_gamma, &params.beta),
        ErrorKind::DimensionMismatch
    );

    let moved_gamma = params.gamma.clone().on_device(Device::cpu(1));
    assert_eq!(
        forward_err(&mut ctx, &x, &moved_gamma, &params.beta),
        ErrorKind::DeviceMismatch
    );

    let int_x = Tensor::zeros(Shape::new(dims), DType::I32);
    assert_eq!(
        forward_err(&mut ctx, &int_x, &params.gamma, &params.beta),
        ErrorKind::PrecisionConfiguration
    );

    assert_eq!(ctx.state(), ContextState::Uninitialized);
    assert_eq!(ctx.running_mean().to_f64_vec(), vec![0.5; 3]);
    assert_eq!(ctx.running_var().to_f64_vec(), vec![1.0; 3]);
    assert_eq!(current_device(), None);
}

pub fn running_statistics_match_by_element_count<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let dims = [2, 3, 2, 2];
    let axis = [0, 2, 3];
    let params = Params::identity(&dims, &axis, DType::F32);
    let mut running_mean = Tensor::zeros(Shape::new([3]), DType::F32);
    let mut running_var = Tensor::full(Shape::new([3]), DType::F32, 1.0);
    let mut rng = seeded_rng(13);
    let x = random_tensor(&mut rng, &dims, DType::F32, 0.0, 1.0);

    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut running_mean,
        &mut running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    drop(ctx);
    assert_eq!(running_mean.shape(), &Shape::new([3]));
    assert!(running_mean.to_f64_vec().iter().all(|&m| m > 0.0));

    let mut too_short = Tensor::zeros(Shape::new([2]), DType::F32);
    let mut ctx = batch_norm_forward_backward(
        backend.as_ref(),
        &mut too_short,
        &mut running_var,
        EPS,
        0.9,
        &axis,
    )
    .unwrap();
    assert_eq!(
        forward_err(&mut ctx, &x, &params.gamma, &params.beta),
        ErrorKind::DimensionMismatch
    );
}

pub fn strided_inputs_match_contiguous_inputs<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let mut rng = seeded_rng(17);
    // A (3, 4) view over (4, 3) storage.
    let storage = random_tensor(&mut rng, &[4, 3], DType::F32, -1.0, 1.0);
    let strided = storage.permute(&[1, 0]).unwrap();
    let contiguous = strided.as_contiguous(None);
    let params = Params::identity(&[3, 4], &[0], DType::F32);

    let run = |x: &Tensor| {
        let mut running_mean = params.running_mean.clone();
        let mut running_var = params.running_var.clone();
        let mut ctx = batch_norm_forward_backward(
            backend.as_ref(),
            &mut running_mean,
            &mut running_var,
            EPS,
            0.9,
            &[0],
        )
        .unwrap();
        let y = ctx.forward(x, &params.gamma, &params.beta).unwrap();
        let grads = ctx.backward(&y).unwrap();
        (y.to_f64_vec(), grads.gx.to_f64_vec())
    };
    assert_eq!(run(&strided), run(&contiguous));
    assert!(!strided.is_contiguous());
}

pub fn backend_failures_leave_running_statistics_untouched<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let recording = RecordingBackend::new(Arc::clone(backend));
    let dims = [4, 3];
    let mut rng = seeded_rng(19);
    let x = random_tensor(&mut rng, &dims, DType::F16, -1.0, 1.0);
    let mut params = Params::identity(&dims, &[0], DType::F16);
    params.running_mean.fill(0.5);

    recording.fail_forward(true);
    let mut ctx = batch_norm_forward_backward(
        &recording,
        &mut params.running_mean,
        &mut params.running_var,
        EPS,
        0.9,
        &[0],
    )
    .unwrap();
    assert_eq!(
        forward_err(&mut ctx, &x, &params.gamma, &params.beta),
        ErrorKind::BackendCompute
    );
    assert_eq!(ctx.state(), ContextState::Uninitialized);
    assert_eq!(ctx.running_mean().to_f64_vec(), vec![0.5; 3]);
    assert_eq!(ctx.running_var().to_f64_vec(), vec![1.0; 3]);
    assert_eq!(current_device(), None);

    recording.fail_forward(false);
    ctx.forward(&x, &params.gamma, &params.beta).unwrap();
    assert_eq!(ctx.state(), ContextState::Forwarded);

    recording.fail_backward(true);
    let gout = Tensor::full(Shape::new(dims), DType::F16, 1.0);
    assert_eq!(
        ctx.backward(&gout).unwrap_err().kind(),
        ErrorKind::BackendCompute
    );
    recording.fail_backward(false);
    let grads = ctx.backward(&gout).unwrap();
    assert_eq!(grads.gx.dtype(), DType::F16);
    assert_eq!(grads.ggamma.dtype(), DType::F16);
    assert_eq!(grads.gbeta.dtype(), DType::F16);

    assert_eq!(
        recording.recorded_calls(),
        vec![
            RecordedCall::ForwardTraining,
            RecordedCall::ForwardTraining,
            RecordedCall::Backward,
            RecordedCall::Backward,
        ]
    );
}

pub fn rejected_inference_never_reaches_backend<B: ComputeBackend + ?Sized + 'static>(
    backend: &Arc<B>,
) {
    let recording = RecordingBackend::new(Arc::clone(backend));
    let params = Params::identity(&[2, 3], &[0], DType::F32);
    let x = Tensor::zeros(Shape::new([2, 3]), DType::F32);
    let err = fixed_batch_norm(
        &recording,
        &x,
        &params.gamma,
        &params.beta,
        &params.running_mean,
        &params.running_var,
        EPS,
        &[1],
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAxis);
    assert!(recording.recorded_calls().is_empty());
}
