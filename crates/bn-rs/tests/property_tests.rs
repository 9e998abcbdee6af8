//! Property-based tests for the batch-normalization engine.
//!
//! Key invariants:
//! - Only `(0,)`, `(0, 2, 3)` and `(0, 2, 3, 4)` resolve to a mode, and resolution is stable
//! - Running-statistics write-back rounds to the caller's precision and is a no-op otherwise
//! - Inference with the batch's own statistics reproduces the training output

use bn_rs::backend::BatchNormMode;
use bn_rs::ops::batch_norm::{
    batch_norm_forward_backward, fixed_batch_norm, resolve_mode, update_running,
};
use bn_rs::tensor::storage::round_to;
use bn_rs::tensor::{DType, Shape, Tensor};
use bn_rs::ErrorKind;
use bn_rs_backend_ref_cpu::CpuReferenceBackend;
use proptest::prelude::*;

fn half_dtype() -> impl Strategy<Value = DType> {
    prop_oneof![Just(DType::F16), Just(DType::BF16), Just(DType::F32)]
}

proptest! {
    #[test]
    fn only_documented_axis_sets_resolve(axis in prop::collection::vec(0usize..6, 0..6)) {
        let accepted: [&[usize]; 3] = [&[0], &[0, 2, 3], &[0, 2, 3, 4]];
        match resolve_mode(&axis) {
            Ok(mode) => {
                prop_assert!(accepted.contains(&axis.as_slice()));
                prop_assert_eq!(mode == BatchNormMode::PerActivation, axis == [0]);
                prop_assert_eq!(resolve_mode(&axis).unwrap(), mode);
            }
            Err(err) => {
                prop_assert!(!accepted.contains(&axis.as_slice()));
                prop_assert_eq!(err.kind(), ErrorKind::InvalidAxis);
            }
        }
    }

    #[test]
    fn write_back_rounds_to_running_precision(
        values in prop::collection::vec(-1.0e3f64..1.0e3, 1..32),
        dtype in half_dtype(),
    ) {
        let shape = Shape::new([values.len()]);
        let mut running = Tensor::zeros(shape.clone(), dtype);
        let updated = Tensor::from_f64(shape, DType::F64, &values).unwrap();
        update_running(&mut running, &updated).unwrap();

        let expected = values.iter().map(|&v| round_to(dtype, v)).collect::<Vec<_>>();
        prop_assert_eq!(running.to_f64_vec(), expected);
        prop_assert_eq!(running.dtype(), dtype);
    }

    #[test]
    fn write_back_is_a_noop_for_matching_precision(
        values in prop::collection::vec(-1.0e3f64..1.0e3, 1..16),
    ) {
        let shape = Shape::new([values.len()]);
        let mut running = Tensor::full(shape.clone(), DType::F64, 7.0);
        let updated = Tensor::from_f64(shape, DType::F64, &values).unwrap();
        update_running(&mut running, &updated).unwrap();
        prop_assert!(running.to_f64_vec().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn inference_with_batch_statistics_matches_training(
        values in prop::collection::vec(-5.0f64..5.0, 12),
        seed_gamma in 0.5f64..2.0,
    ) {
        prop_assume!(values.iter().any(|&v| (v - values[0]).abs() > 1e-3));
        let backend = CpuReferenceBackend::new();
        let x = Tensor::from_f64(Shape::new([12, 1]), DType::F64, &values).unwrap();
        let gamma = Tensor::full(Shape::new([1, 1]), DType::F64, seed_gamma);
        let beta = Tensor::full(Shape::new([1, 1]), DType::F64, 0.25);
        let mut running_mean = Tensor::zeros(Shape::new([1]), DType::F64);
        let mut running_var = Tensor::full(Shape::new([1]), DType::F64, 1.0);

        let mut ctx = batch_norm_forward_backward(
            &backend, &mut running_mean, &mut running_var, 1e-5, 0.9, &[0],
        ).unwrap();
        let y_train = ctx.forward(&x, &gamma, &beta).unwrap();
        let saved = ctx.saved().unwrap();
        let mean = saved.batch_mean().reshape(Shape::new([1, 1])).unwrap();
        let inv_std = saved.batch_inv_std().to_f64_vec()[0];
        let var = Tensor::full(Shape::new([1, 1]), DType::F64, 1.0 / (inv_std * inv_std) - 1e-5);

        let y_infer = fixed_batch_norm(&backend, &x, &gamma, &beta, &mean, &var, 1e-5, &[0]).unwrap();
        for (a, b) in y_train.to_f64_vec().iter().zip(y_infer.to_f64_vec()) {
            prop_assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
        }
    }
}
