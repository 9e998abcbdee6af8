use std::sync::{Arc, Mutex};

use anyhow::Result;
use approx::{assert_abs_diff_eq, assert_relative_eq};
use bn_rs::backend::registry::create_backend;
use bn_rs::backend::{
    current_device, BackendResult, BackwardOutput, BackwardRequest, BatchNormMode, ComputeBackend,
    InferenceRequest, TensorDescriptor, TrainingOutput, TrainingRequest,
};
use bn_rs::nn::BatchNorm;
use bn_rs::tensor::{DType, Device, Shape, Tensor};
use bn_rs::{BatchNormConfig, ErrorKind};
use bn_rs_backend_ref_cpu::CpuReferenceBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn layer_from_json_config_runs_on_registry_backend() -> Result<()> {
    init_logging();
    bn_rs_backend_ref_cpu::register_cpu_backend();
    let backend: Arc<dyn ComputeBackend> = create_backend("cpu").expect("cpu backend registered");
    let config = BatchNormConfig::from_json_str(r#"{"eps": 1e-5, "decay": 0.8}"#)?;
    assert_eq!(config.axis, vec![0, 2, 3]);

    let mut layer = BatchNorm::new(backend, Shape::new([1, 3, 1, 1]), DType::F32, config)?;
    let mut rng = StdRng::seed_from_u64(0);
    let x = Tensor::randn(Shape::new([2, 3, 4, 4]), DType::F32, 0.5, 1.5, &mut rng);

    let (y, ctx) = layer.forward_train(&x)?;
    assert_eq!(y.shape(), x.shape());
    let grads = ctx.backward(&Tensor::full(x.shape().clone(), DType::F32, 1.0))?;
    // A constant upstream gradient carries no information through the normalization.
    for g in grads.gx.to_f64_vec() {
        assert_abs_diff_eq!(g, 0.0, epsilon = 1e-4);
    }
    for g in grads.gbeta.to_f64_vec() {
        assert_relative_eq!(g, 32.0, max_relative = 1e-6);
    }
    drop(ctx);

    assert!(layer.running_mean().to_f64_vec().iter().any(|&m| m != 0.0));
    let y_infer = layer.forward_inference(&x)?;
    assert_eq!(y_infer.shape(), x.shape());
    Ok(())
}

#[test]
fn layer_rejects_unusable_configuration() {
    let backend = Arc::new(CpuReferenceBackend::new());
    let shape = Shape::new([1, 4]);
    let tiny_eps = BatchNormConfig {
        eps: 1e-7,
        ..BatchNormConfig::dense()
    };
    let err = BatchNorm::new(Arc::clone(&backend), shape.clone(), DType::F32, tiny_eps).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PrecisionConfiguration);

    let bad_axis = BatchNormConfig {
        axis: vec![1],
        ..BatchNormConfig::dense()
    };
    let err = BatchNorm::new(backend, shape, DType::F32, bad_axis).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAxis);
}

/// Delegates to the reference backend and records the device current during each primitive.
struct DeviceRecorder {
    inner: CpuReferenceBackend,
    seen: Mutex<Vec<Option<Device>>>,
}

impl DeviceRecorder {
    fn observe(&self) {
        self.seen.lock().unwrap().push(current_device());
    }
}

impl ComputeBackend for DeviceRecorder {
    fn backend_name(&self) -> &str {
        "device-recorder"
    }

    fn supports_device(&self, device: Device) -> bool {
        self.inner.supports_device(device)
    }

    fn minimum_epsilon(&self) -> f64 {
        self.inner.minimum_epsilon()
    }

    fn derive_statistics_descriptor(
        &self,
        input: &TensorDescriptor,
        mode: BatchNormMode,
    ) -> BackendResult<TensorDescriptor> {
        self.inner.derive_statistics_descriptor(input, mode)
    }

    fn forward_training(
        &self,
        request: TrainingRequest<'_>,
        running_mean: &mut Tensor,
        running_var: &mut Tensor,
    ) -> BackendResult<TrainingOutput> {
        self.observe();
        self.inner
            .forward_training(request, running_mean, running_var)
    }

    fn forward_inference(&self, request: InferenceRequest<'_>) -> BackendResult<Tensor> {
        self.observe();
        self.inner.forward_inference(request)
    }

    fn backward(&self, request: BackwardRequest<'_>) -> BackendResult<BackwardOutput> {
        self.observe();
        self.inner.backward(request)
    }
}

#[test]
fn primitives_run_inside_the_input_device_scope() -> Result<()> {
    let recorder = Arc::new(DeviceRecorder {
        inner: CpuReferenceBackend::new(),
        seen: Mutex::new(Vec::new()),
    });
    let device = Device::cpu(2);
    let mut layer = BatchNorm::new(
        Arc::clone(&recorder),
        Shape::new([1, 2]),
        DType::F64,
        BatchNormConfig::dense(),
    )?;
    // Parameters and running statistics move along with the input.
    layer.gamma = layer.gamma.clone().on_device(device);
    layer.beta = layer.beta.clone().on_device(device);
    let x = Tensor::from_f64(Shape::new([2, 2]), DType::F64, &[1.0, 2.0, 3.0, 5.0])?
        .on_device(device);

    let err = layer.forward_train(&x).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceMismatch);
    assert!(recorder.seen.lock().unwrap().is_empty());
    assert_eq!(current_device(), None);

    let layer = BatchNorm::new(
        Arc::clone(&recorder),
        Shape::new([1, 2]),
        DType::F64,
        BatchNormConfig::dense(),
    )?;
    let x = Tensor::from_f64(Shape::new([2, 2]), DType::F64, &[1.0, 2.0, 3.0, 5.0])?;
    let y = layer.forward_inference(&x)?.to_f64_vec();
    // Fresh running statistics are mean 0 and variance 1.
    for (out, input) in y.iter().zip([1.0, 2.0, 3.0, 5.0]) {
        assert_relative_eq!(*out, input / (1.0f64 + 2e-5).sqrt(), max_relative = 1e-12);
    }
    assert_eq!(*recorder.seen.lock().unwrap(), vec![Some(Device::cpu(0))]);
    assert_eq!(current_device(), None);
    Ok(())
}
