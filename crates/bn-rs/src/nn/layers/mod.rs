//! Layers that own parameters and delegate computation to `ops`.

pub mod batch_norm;

pub use batch_norm::BatchNorm;
