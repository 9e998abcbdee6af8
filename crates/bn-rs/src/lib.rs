pub mod backend;
pub mod config;
mod env;
pub mod error;
pub mod nn;
pub mod ops;
pub mod tensor;

pub use backend::spec::ComputeBackend;
pub use config::BatchNormConfig;
pub use error::{BatchNormError, BatchNormResult, ErrorKind};
pub use ops::batch_norm::{
    batch_norm_forward_backward, fixed_batch_norm, BatchNormContext, BatchNormGradients,
};
pub use tensor::{DType, Device, Shape, Tensor};
