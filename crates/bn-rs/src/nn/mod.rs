//! Neural network building blocks layered on top of the batch-normalization engine.

pub mod layers;

pub use layers::*;
