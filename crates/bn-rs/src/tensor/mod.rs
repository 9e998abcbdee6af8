//! Core tensor abstractions shared by the engine and its backends.
//!
//! The tensor module defines shapes, dtypes, device identity, storage element traits, and the
//! strided host tensor that carries activations, parameters and running statistics between the
//! engine and a [`ComputeBackend`](crate::backend::ComputeBackend).

mod device;
pub mod dtype;
mod host_tensor;
pub mod shape;
pub mod storage;

pub use device::{Device, DeviceKind};
pub use dtype::{DType, DTypeKind};
pub use host_tensor::Tensor;
pub use shape::Shape;
