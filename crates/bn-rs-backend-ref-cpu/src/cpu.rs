use std::sync::Arc;

use bn_rs::backend::shape_helpers::{reduced_count, statistic_index_map};
use bn_rs::backend::{
    BackendError, BackendResult, BackwardOutput, BackwardRequest, BatchNormMode, ComputeBackend,
    InferenceRequest, TensorDescriptor, TrainingOutput, TrainingRequest,
};
use bn_rs::tensor::{DType, Device, DeviceKind, Shape, Tensor};

/// Smallest epsilon accepted by the reference kernels.
pub const MIN_EPSILON: f64 = 1e-5;

/// Primitive about to run on a [`GenericCpuBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuKernel {
    ForwardTraining,
    ForwardInference,
    Backward,
}

impl CpuKernel {
    fn name(self) -> &'static str {
        match self {
            CpuKernel::ForwardTraining => "batch_norm_forward_training",
            CpuKernel::ForwardInference => "batch_norm_forward_inference",
            CpuKernel::Backward => "batch_norm_backward",
        }
    }
}

/// Hook consulted before every kernel launch. Returning an error aborts the kernel before it reads
/// or writes any operand.
pub trait CpuKernelInterceptor: Send + Sync {
    fn before_kernel(&self, kernel: CpuKernel, input: &TensorDescriptor) -> BackendResult<()>;
}

#[derive(Default)]
pub struct NoopInterceptor;

impl CpuKernelInterceptor for NoopInterceptor {
    fn before_kernel(&self, _kernel: CpuKernel, _input: &TensorDescriptor) -> BackendResult<()> {
        Ok(())
    }
}

/// Reference batch-normalization backend. Accumulates in `f64` on the host.
#[derive(Clone)]
pub struct GenericCpuBackend<I: CpuKernelInterceptor> {
    interceptor: Arc<I>,
}

impl<I: CpuKernelInterceptor> GenericCpuBackend<I> {
    pub fn with_interceptor(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    fn launch(&self, kernel: CpuKernel, x: &Tensor) -> BackendResult<()> {
        self.interceptor
            .before_kernel(kernel, &TensorDescriptor::of(x))?;
        log::trace!("{} on {} {}", kernel.name(), x.shape(), x.dtype());
        Ok(())
    }
}

impl GenericCpuBackend<NoopInterceptor> {
    pub fn new() -> Self {
        Self::with_interceptor(NoopInterceptor)
    }
}

impl Default for GenericCpuBackend<NoopInterceptor> {
    fn default() -> Self {
        Self::new()
    }
}

pub type CpuReferenceBackend = GenericCpuBackend<NoopInterceptor>;

impl<I: CpuKernelInterceptor> ComputeBackend for GenericCpuBackend<I> {
    fn backend_name(&self) -> &str {
        "cpu-reference"
    }

    fn supports_device(&self, device: Device) -> bool {
        device.kind == DeviceKind::Cpu
    }

    fn minimum_epsilon(&self) -> f64 {
        MIN_EPSILON
    }

    fn derive_statistics_descriptor(
        &self,
        input: &TensorDescriptor,
        mode: BatchNormMode,
    ) -> BackendResult<TensorDescriptor> {
        let dtype = statistics_dtype(input.dtype)?;
        let axes = mode.reduction_axes(input.shape.rank());
        Ok(TensorDescriptor::new(input.shape.reduce_keepdims(&axes), dtype))
    }

    fn forward_training(
        &self,
        request: TrainingRequest<'_>,
        running_mean: &mut Tensor,
        running_var: &mut Tensor,
    ) -> BackendResult<TrainingOutput> {
        let op = CpuKernel::ForwardTraining.name();
        let layout = StatisticsLayout::new(op, request.mode, request.x)?;
        check_statistic(op, "gamma", request.gamma, &layout)?;
        check_statistic(op, "beta", request.beta, &layout)?;
        check_running(op, "running_mean", running_mean, &layout)?;
        check_running(op, "running_var", running_var, &layout)?;
        if !(0.0..=1.0).contains(&request.momentum) {
            return Err(BackendError::invalid_argument(
                op,
                format!("momentum {} outside [0, 1]", request.momentum),
            ));
        }
        self.launch(CpuKernel::ForwardTraining, request.x)?;

        let x = request.x.to_f64_vec();
        let gamma = request.gamma.to_f64_vec();
        let beta = request.beta.to_f64_vec();
        let (mean, var) = layout.moments(&x);
        let inv_std = var
            .iter()
            .map(|&v| 1.0 / (v + request.eps).sqrt())
            .collect::<Vec<_>>();

        let y = x
            .iter()
            .zip(&layout.index_map)
            .map(|(&value, &s)| gamma[s] * (value - mean[s]) * inv_std[s] + beta[s])
            .collect::<Vec<_>>();

        // Unbiased batch variance feeds the running estimate.
        let m = layout.count as f64;
        let correction = m / (m - 1.0).max(1.0);
        let momentum = request.momentum;
        let new_mean = running_mean
            .to_f64_vec()
            .iter()
            .zip(&mean)
            .map(|(&old, &batch)| (1.0 - momentum) * old + momentum * batch)
            .collect::<Vec<_>>();
        let new_var = running_var
            .to_f64_vec()
            .iter()
            .zip(&var)
            .map(|(&old, &batch)| (1.0 - momentum) * old + momentum * batch * correction)
            .collect::<Vec<_>>();

        let output = layout.tensor(op, request.x.shape().clone(), request.x.dtype(), &y)?;
        let batch_mean = layout.tensor(op, layout.stats_shape.clone(), layout.stats_dtype, &mean)?;
        let batch_inv_std =
            layout.tensor(op, layout.stats_shape.clone(), layout.stats_dtype, &inv_std)?;

        running_mean
            .write_f64(&new_mean)
            .map_err(|err| BackendError::execution(err.to_string()))?;
        running_var
            .write_f64(&new_var)
            .map_err(|err| BackendError::execution(err.to_string()))?;

        Ok(TrainingOutput {
            output,
            batch_mean,
            batch_inv_std,
        })
    }

    fn forward_inference(&self, request: InferenceRequest<'_>) -> BackendResult<Tensor> {
        let op = CpuKernel::ForwardInference.name();
        let layout = StatisticsLayout::new(op, request.mode, request.x)?;
        for (label, tensor) in [
            ("gamma", request.gamma),
            ("beta", request.beta),
            ("mean", request.mean),
            ("var", request.var),
        ] {
            check_statistic(op, label, tensor, &layout)?;
        }
        self.launch(CpuKernel::ForwardInference, request.x)?;

        let gamma = request.gamma.to_f64_vec();
        let beta = request.beta.to_f64_vec();
        let mean = request.mean.to_f64_vec();
        let inv_std = request
            .var
            .to_f64_vec()
            .iter()
            .map(|&v| 1.0 / (v + request.eps).sqrt())
            .collect::<Vec<_>>();
        let y = request
            .x
            .to_f64_vec()
            .iter()
            .zip(&layout.index_map)
            .map(|(&value, &s)| gamma[s] * (value - mean[s]) * inv_std[s] + beta[s])
            .collect::<Vec<_>>();
        layout.tensor(op, request.x.shape().clone(), request.x.dtype(), &y)
    }

    fn backward(&self, request: BackwardRequest<'_>) -> BackendResult<BackwardOutput> {
        let op = CpuKernel::Backward.name();
        let layout = StatisticsLayout::new(op, request.mode, request.x)?;
        if request.gout.shape() != request.x.shape() {
            return Err(BackendError::invalid_argument(
                op,
                format!(
                    "gout shape {} differs from x shape {}",
                    request.gout.shape(),
                    request.x.shape()
                ),
            ));
        }
        check_statistic(op, "gamma", request.gamma, &layout)?;
        check_statistic(op, "batch_mean", request.batch_mean, &layout)?;
        check_statistic(op, "batch_inv_std", request.batch_inv_std, &layout)?;
        self.launch(CpuKernel::Backward, request.x)?;

        let x = request.x.to_f64_vec();
        let gout = request.gout.to_f64_vec();
        let gamma = request.gamma.to_f64_vec();
        let mean = request.batch_mean.to_f64_vec();
        let inv_std = request.batch_inv_std.to_f64_vec();

        let xhat = x
            .iter()
            .zip(&layout.index_map)
            .map(|(&value, &s)| (value - mean[s]) * inv_std[s])
            .collect::<Vec<_>>();
        let mut gbeta = vec![0.0f64; layout.num_stats];
        let mut ggamma = vec![0.0f64; layout.num_stats];
        for ((&g, &xh), &s) in gout.iter().zip(&xhat).zip(&layout.index_map) {
            gbeta[s] += g;
            ggamma[s] += g * xh;
        }

        let m = layout.count as f64;
        let gx = gout
            .iter()
            .zip(&xhat)
            .zip(&layout.index_map)
            .map(|((&g, &xh), &s)| {
                gamma[s] * inv_std[s] / m * (m * g - gbeta[s] - xh * ggamma[s])
            })
            .collect::<Vec<_>>();

        Ok(BackwardOutput {
            gx: layout.tensor(op, request.x.shape().clone(), request.x.dtype(), &gx)?,
            ggamma: layout.tensor(op, layout.stats_shape.clone(), layout.stats_dtype, &ggamma)?,
            gbeta: layout.tensor(op, layout.stats_shape.clone(), layout.stats_dtype, &gbeta)?,
        })
    }
}

/// Canonical statistics precision for an input dtype.
pub fn statistics_dtype(input: DType) -> BackendResult<DType> {
    match input {
        DType::F16 | DType::BF16 | DType::F32 => Ok(DType::F32),
        DType::F64 => Ok(DType::F64),
        other => Err(BackendError::unsupported(
            "batch_norm",
            format!("no statistics precision for {other} inputs"),
        )),
    }
}

/// How the elements of one input map onto its statistics.
struct StatisticsLayout {
    stats_shape: Shape,
    stats_dtype: DType,
    device: Device,
    index_map: Vec<usize>,
    num_stats: usize,
    count: usize,
}

impl StatisticsLayout {
    fn new(op: &'static str, mode: BatchNormMode, x: &Tensor) -> BackendResult<Self> {
        let dims = x.shape().dims();
        if dims.len() < 2 {
            return Err(BackendError::invalid_argument(
                op,
                format!("input of rank {} has no feature axis", dims.len()),
            ));
        }
        let axes = mode.reduction_axes(dims.len());
        let count = reduced_count(dims, &axes).ok_or_else(|| {
            BackendError::invalid_argument(
                op,
                format!("reduced element count of {} overflows usize", x.shape()),
            )
        })?;
        if count == 0 {
            return Err(BackendError::invalid_argument(
                op,
                format!("cannot normalize an empty batch of shape {}", x.shape()),
            ));
        }
        let stats_shape = x.shape().reduce_keepdims(&axes);
        Ok(Self {
            num_stats: stats_shape.num_elements(),
            stats_shape,
            stats_dtype: statistics_dtype(x.dtype())?,
            device: x.device(),
            index_map: statistic_index_map(dims, &axes),
            count,
        })
    }

    /// Biased per-statistic mean and variance.
    fn moments(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let m = self.count as f64;
        let mut mean = vec![0.0f64; self.num_stats];
        for (&value, &s) in x.iter().zip(&self.index_map) {
            mean[s] += value;
        }
        mean.iter_mut().for_each(|v| *v /= m);

        let mut var = vec![0.0f64; self.num_stats];
        for (&value, &s) in x.iter().zip(&self.index_map) {
            let centered = value - mean[s];
            var[s] += centered * centered;
        }
        var.iter_mut().for_each(|v| *v /= m);
        (mean, var)
    }

    fn tensor(
        &self,
        op: &'static str,
        shape: Shape,
        dtype: DType,
        values: &[f64],
    ) -> BackendResult<Tensor> {
        Tensor::from_f64(shape, dtype, values)
            .map(|t| t.on_device(self.device))
            .map_err(|err| BackendError::execution(format!("{op}: {err}")))
    }
}

fn check_statistic(
    op: &'static str,
    label: &str,
    tensor: &Tensor,
    layout: &StatisticsLayout,
) -> BackendResult<()> {
    if tensor.dtype() != layout.stats_dtype {
        return Err(BackendError::invalid_argument(
            op,
            format!(
                "{label} must be {} but is {}",
                layout.stats_dtype,
                tensor.dtype()
            ),
        ));
    }
    if tensor.len() != layout.num_stats {
        return Err(BackendError::invalid_argument(
            op,
            format!(
                "{label} holds {} values, expected {}",
                tensor.len(),
                layout.num_stats
            ),
        ));
    }
    Ok(())
}

fn check_running(
    op: &'static str,
    label: &str,
    tensor: &Tensor,
    layout: &StatisticsLayout,
) -> BackendResult<()> {
    check_statistic(op, label, tensor, layout)?;
    if !tensor.is_contiguous() {
        return Err(BackendError::invalid_argument(
            op,
            format!("{label} must be contiguous"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn backend() -> CpuReferenceBackend {
        CpuReferenceBackend::new()
    }

    #[test]
    fn half_precision_inputs_use_f32_statistics() {
        let descriptor = TensorDescriptor::new(Shape::new([2, 3, 4, 4]), DType::F16);
        let stats = backend()
            .derive_statistics_descriptor(&descriptor, BatchNormMode::Spatial)
            .unwrap();
        assert_eq!(stats.shape, Shape::new([1, 3, 1, 1]));
        assert_eq!(stats.dtype, DType::F32);
    }

    #[test]
    fn integer_inputs_are_unsupported() {
        let descriptor = TensorDescriptor::new(Shape::new([2, 3]), DType::I32);
        let err = backend()
            .derive_statistics_descriptor(&descriptor, BatchNormMode::PerActivation)
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported { .. }));
    }

    #[test]
    fn per_activation_training_normalizes_columns() {
        let x = Tensor::from_f64(Shape::new([2, 2]), DType::F64, &[1.0, 10.0, 3.0, 30.0]).unwrap();
        let gamma = Tensor::full(Shape::new([1, 2]), DType::F64, 1.0);
        let beta = Tensor::zeros(Shape::new([1, 2]), DType::F64);
        let mut running_mean = Tensor::zeros(Shape::new([2]), DType::F64);
        let mut running_var = Tensor::full(Shape::new([2]), DType::F64, 1.0);

        let out = backend()
            .forward_training(
                TrainingRequest {
                    mode: BatchNormMode::PerActivation,
                    x: &x,
                    gamma: &gamma,
                    beta: &beta,
                    momentum: 0.5,
                    eps: MIN_EPSILON,
                },
                &mut running_mean,
                &mut running_var,
            )
            .unwrap();

        assert_eq!(out.batch_mean.to_f64_vec(), vec![2.0, 20.0]);
        let y = out.output.to_f64_vec();
        assert_abs_diff_eq!(y[0], -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y[2], 1.0, epsilon = 1e-4);
        assert_eq!(running_mean.to_f64_vec(), vec![1.0, 10.0]);
        // Unbiased variances are 2 and 200.
        let var = running_var.to_f64_vec();
        assert_abs_diff_eq!(var[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(var[1], 100.5, epsilon = 1e-12);
    }

    struct Refuse;

    impl CpuKernelInterceptor for Refuse {
        fn before_kernel(&self, kernel: CpuKernel, _input: &TensorDescriptor) -> BackendResult<()> {
            Err(BackendError::execution(format!("{} refused", kernel.name())))
        }
    }

    #[test]
    fn refused_kernel_leaves_running_buffers_untouched() {
        let backend = GenericCpuBackend::with_interceptor(Refuse);
        let x = Tensor::from_f64(Shape::new([2, 1]), DType::F32, &[1.0, 3.0]).unwrap();
        let gamma = Tensor::full(Shape::new([1, 1]), DType::F32, 1.0);
        let beta = Tensor::zeros(Shape::new([1, 1]), DType::F32);
        let mut running_mean = Tensor::full(Shape::new([1]), DType::F32, 7.0);
        let mut running_var = Tensor::full(Shape::new([1]), DType::F32, 7.0);
        let result = backend.forward_training(
            TrainingRequest {
                mode: BatchNormMode::PerActivation,
                x: &x,
                gamma: &gamma,
                beta: &beta,
                momentum: 0.1,
                eps: MIN_EPSILON,
            },
            &mut running_mean,
            &mut running_var,
        );
        assert!(result.is_err());
        assert_eq!(running_mean.to_f64_vec(), vec![7.0]);
        assert_eq!(running_var.to_f64_vec(), vec![7.0]);
    }

    #[test]
    fn outputs_follow_the_input_device() {
        let x = Tensor::from_f64(Shape::new([2, 1]), DType::F32, &[1.0, 3.0])
            .unwrap()
            .on_device(Device::cpu(1));
        let stat = |v: f64| Tensor::full(Shape::new([1, 1]), DType::F32, v).on_device(Device::cpu(1));
        let y = backend()
            .forward_inference(InferenceRequest {
                mode: BatchNormMode::PerActivation,
                x: &x,
                gamma: &stat(1.0),
                beta: &stat(0.0),
                mean: &stat(2.0),
                var: &stat(1.0),
                eps: MIN_EPSILON,
            })
            .unwrap();
        assert_eq!(y.device(), Device::cpu(1));
        assert_abs_diff_eq!(y.to_f64_vec()[1], 1.0, epsilon = 1e-4);
    }
}
