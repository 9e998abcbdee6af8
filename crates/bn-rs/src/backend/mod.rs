//! Backend capability, registry and device affinity.

pub mod device_scope;
pub mod registry;
pub mod shape_helpers;
pub mod spec;

pub use device_scope::{current_device, DeviceScope};
pub use spec::{
    BackendError, BackendResult, BackwardOutput, BackwardRequest, BatchNormMode, ComputeBackend,
    InferenceRequest, TensorDescriptor, TrainingOutput, TrainingRequest,
};
