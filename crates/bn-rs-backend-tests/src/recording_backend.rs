use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bn_rs::backend::{
    BackendError, BackendResult, BackwardOutput, BackwardRequest, BatchNormMode, ComputeBackend,
    InferenceRequest, TensorDescriptor, TrainingOutput, TrainingRequest,
};
use bn_rs::tensor::{Device, Tensor};

/// Primitive invoked on a [`RecordingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedCall {
    ForwardTraining,
    ForwardInference,
    Backward,
}

/// Test-only backend that records which primitives were invoked and can be told to fail them.
///
/// Every call is forwarded to the wrapped backend unless its failure switch is on, in which case
/// the call is recorded and rejected before the inner backend sees any operand.
pub struct RecordingBackend<B: ComputeBackend + ?Sized> {
    inner: Arc<B>,
    calls: Mutex<Vec<RecordedCall>>,
    fail_forward: AtomicBool,
    fail_backward: AtomicBool,
}

impl<B: ComputeBackend + ?Sized> RecordingBackend<B> {
    pub fn new(inner: Arc<B>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_forward: AtomicBool::new(false),
            fail_backward: AtomicBool::new(false),
        }
    }

    pub fn fail_forward(&self, fail: bool) {
        self.fail_forward.store(fail, Ordering::SeqCst);
    }

    pub fn fail_backward(&self, fail: bool) {
        self.fail_backward.store(fail, Ordering::SeqCst);
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("backend mutex poisoned").clone()
    }

    fn record(&self, call: RecordedCall, fail: &AtomicBool) -> BackendResult<()> {
        self.calls.lock().expect("backend mutex poisoned").push(call);
        if fail.load(Ordering::SeqCst) {
            return Err(BackendError::execution(format!("{call:?} failed on request")));
        }
        Ok(())
    }
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for RecordingBackend<B> {
    fn backend_name(&self) -> &str {
        "recording"
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
        self.record(RecordedCall::ForwardTraining, &self.fail_forward)?;
        self.inner
            .forward_training(request, running_mean, running_var)
    }

    fn forward_inference(&self, request: InferenceRequest<'_>) -> BackendResult<Tensor> {
        self.record(RecordedCall::ForwardInference, &self.fail_forward)?;
        self.inner.forward_inference(request)
    }

    fn backward(&self, request: BackwardRequest<'_>) -> BackendResult<BackwardOutput> {
        self.record(RecordedCall::Backward, &self.fail_backward)?;
        self.inner.backward(request)
    }
}
