//! Batch normalization layer owning its affine parameters and running statistics.
//!
//! Training steps borrow the running buffers through a [`BatchNormContext`], which is handed back
//! to the caller so the same invocation can run backward.

use std::fmt;
use std::sync::Arc;

use crate::backend::ComputeBackend;
use crate::config::BatchNormConfig;
use crate::error::BatchNormResult;
use crate::ops::batch_norm::{
    batch_norm_forward_backward, ensure_decay, ensure_eps, fixed_batch_norm, resolve_mode,
    BatchNormContext,
};
use crate::tensor::{DType, Shape, Tensor};

/// Batch normalization with learnable `gamma`/`beta` and decayed running statistics.
pub struct BatchNorm<B: ComputeBackend + ?Sized> {
    backend: Arc<B>,
    pub gamma: Tensor,
    pub beta: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
    config: BatchNormConfig,
}

impl<B: ComputeBackend + ?Sized> BatchNorm<B> {
    /// Creates a layer whose parameters have `param_shape`, e.g. `(1, C, 1, 1)` for NCHW inputs.
    ///
    /// `gamma` and the running variance start at one, `beta` and the running mean at zero.
    pub fn new(
        backend: Arc<B>,
        param_shape: Shape,
        dtype: DType,
        config: BatchNormConfig,
    ) -> BatchNormResult<Self> {
        ensure_eps(backend.as_ref(), config.eps)?;
        ensure_decay(config.decay)?;
        resolve_mode(&config.axis)?;
        Ok(Self {
            backend,
            gamma: Tensor::full(param_shape.clone(), dtype, 1.0),
            beta: Tensor::zeros(param_shape.clone(), dtype),
            running_mean: Tensor::zeros(param_shape.clone(), dtype),
            running_var: Tensor::full(param_shape, dtype, 1.0),
            config,
        })
    }

    /// Normalizes `x` with batch statistics and updates the running statistics.
    ///
    /// Returns the output together with the context holding the saved batch statistics; call
    /// [`BatchNormContext::backward`] on it for gradients. The running statistics stay borrowed
    /// until the context is dropped.
    pub fn forward_train(
        &mut self,
        x: &Tensor,
    ) -> BatchNormResult<(Tensor, BatchNormContext<'_, B>)> {
        let mut ctx = batch_norm_forward_backward(
            self.backend.as_ref(),
            &mut self.running_mean,
            &mut self.running_var,
            self.config.eps,
            self.config.decay,
            &self.config.axis,
        )?;
        let y = ctx.forward(x, &self.gamma, &self.beta)?;
        Ok((y, ctx))
    }

    /// Normalizes `x` with the current running statistics.
    pub fn forward_inference(&self, x: &Tensor) -> BatchNormResult<Tensor> {
        fixed_batch_norm(
            self.backend.as_ref(),
            x,
            &self.gamma,
            &self.beta,
            &self.running_mean,
            &self.running_var,
            self.config.eps,
            &self.config.axis,
        )
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    pub fn config(&self) -> &BatchNormConfig {
        &self.config
    }

    /// Returns the backend handle the layer runs on.
    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }
}

impl<B: ComputeBackend + ?Sized> fmt::Debug for BatchNorm<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchNorm")
            .field("backend", &self.backend.backend_name())
            .field("gamma", &self.gamma.shape())
            .field("config", &self.config)
            .finish()
    }
}
