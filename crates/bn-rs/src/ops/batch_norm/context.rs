//! Forward-training and backward passes sharing one invocation context.
//!
//! A [`BatchNormContext`] is created per operator invocation. It borrows the caller's running
//! statistics for its whole lifetime, so no other code can touch those buffers while forward may
//! still update them. The context moves from [`ContextState::Uninitialized`] to
//! [`ContextState::Forwarded`] on the first successful [`BatchNormContext::forward`]; from then on
//! [`BatchNormContext::backward`] may run any number of times against the saved batch statistics.

use std::fmt;

use crate::backend::{
    BackwardRequest, BatchNormMode, ComputeBackend, DeviceScope, TensorDescriptor,
    TrainingRequest,
};
use crate::error::{BatchNormError, BatchNormResult};
use crate::tensor::{DType, Tensor};

use super::axis::{check_rank, resolve_mode};
use super::precision::{cast_contiguous, running_surrogate, update_running};
use super::validate::{
    ensure_colocated, ensure_contiguous, ensure_decay, ensure_element_count, ensure_eps,
    ensure_float, ensure_shape,
};

/// Lifecycle of a [`BatchNormContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Forwarded,
}

/// Intermediates saved by forward for reuse in backward. Read-only once stored.
#[derive(Debug, Clone)]
pub struct SavedActivations {
    x: Tensor,
    gamma: Tensor,
    batch_mean: Tensor,
    batch_inv_std: Tensor,
    beta_dtype: DType,
}

impl SavedActivations {
    /// Contiguous snapshot of the forward input.
    pub fn x(&self) -> &Tensor {
        &self.x
    }

    /// Scale parameter in the caller's original precision.
    pub fn gamma(&self) -> &Tensor {
        &self.gamma
    }

    pub fn batch_mean(&self) -> &Tensor {
        &self.batch_mean
    }

    /// `1 / sqrt(var + eps)` of the batch, in canonical statistics precision.
    pub fn batch_inv_std(&self) -> &Tensor {
        &self.batch_inv_std
    }

    pub fn beta_dtype(&self) -> DType {
        self.beta_dtype
    }
}

/// Gradients returned by [`BatchNormContext::backward`].
#[derive(Debug, Clone)]
pub struct BatchNormGradients {
    /// Gradient with respect to the input; shape and dtype of `x`.
    pub gx: Tensor,
    /// Gradient with respect to `gamma`, in `gamma`'s dtype.
    pub ggamma: Tensor,
    /// Gradient with respect to `beta`, in `beta`'s dtype.
    pub gbeta: Tensor,
}

/// State of one batch-normalization invocation: configuration, borrowed running statistics and,
/// after forward, the saved batch statistics.
pub struct BatchNormContext<'a, B: ComputeBackend + ?Sized> {
    backend: &'a B,
    running_mean: &'a mut Tensor,
    running_var: &'a mut Tensor,
    eps: f64,
    decay: f64,
    axis: Vec<usize>,
    saved: Option<SavedActivations>,
}

impl<'a, B: ComputeBackend + ?Sized> BatchNormContext<'a, B> {
    /// Creates a context after checking the configuration the backend depends on.
    ///
    /// The epsilon floor is checked before anything else, then the contiguity of `running_mean`
    /// and `running_var` (in that order): the backend updates them in place, so a strided view
    /// cannot be accepted by silently copying it.
    pub fn new(
        backend: &'a B,
        running_mean: &'a mut Tensor,
        running_var: &'a mut Tensor,
        eps: f64,
        decay: f64,
        axis: &[usize],
    ) -> BatchNormResult<Self> {
        ensure_eps(backend, eps)?;
        ensure_decay(decay)?;
        ensure_contiguous("running mean", running_mean)?;
        ensure_contiguous("running variance", running_var)?;
        Ok(Self {
            backend,
            running_mean,
            running_var,
            eps,
            decay,
            axis: axis.to_vec(),
            saved: None,
        })
    }

    pub fn state(&self) -> ContextState {
        if self.saved.is_some() {
            ContextState::Forwarded
        } else {
            ContextState::Uninitialized
        }
    }

    pub fn saved(&self) -> Option<&SavedActivations> {
        self.saved.as_ref()
    }

    pub fn running_mean(&self) -> &Tensor {
        self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        self.running_var
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn axis(&self) -> &[usize] {
        &self.axis
    }

    /// Normalizes `x` with batch statistics, updates the running statistics in place and saves the
    /// intermediates backward needs. Returns an output with the shape and dtype of `x`.
    ///
    /// Running statistics are only written after the backend returned successfully. A repeated
    /// forward replaces the saved intermediates.
    pub fn forward(&mut self, x: &Tensor, gamma: &Tensor, beta: &Tensor) -> BatchNormResult<Tensor> {
        let mode = resolve_mode(&self.axis)?;
        check_rank(mode, &self.axis, x.shape().rank())?;

        let reduced = x.shape().reduce_keepdims(&self.axis);
        ensure_shape("gamma", gamma, &reduced)?;
        ensure_shape("beta", beta, &reduced)?;
        ensure_element_count("running mean", self.running_mean, reduced.num_elements())?;
        ensure_element_count("running variance", self.running_var, reduced.num_elements())?;
        ensure_colocated(
            self.backend,
            ("x", x),
            &[
                ("gamma", gamma),
                ("beta", beta),
                ("running mean", self.running_mean),
                ("running variance", self.running_var),
            ],
        )?;
        ensure_float(&[
            ("x", x),
            ("gamma", gamma),
            ("beta", beta),
            ("running mean", self.running_mean),
            ("running variance", self.running_var),
        ])?;

        let _scope = DeviceScope::enter(x.device());

        let x_cont = cast_contiguous(x, None);
        let stats_dtype = self.statistics_dtype(&x_cont, mode)?;
        let gamma_cast = cast_contiguous(gamma, Some(stats_dtype));
        let beta_cast = cast_contiguous(beta, Some(stats_dtype));

        let mut mean_surrogate = running_surrogate(self.running_mean, stats_dtype);
        let mut var_surrogate = running_surrogate(self.running_var, stats_dtype);
        log::debug!(
            "batch norm forward: mode={mode} x={} {} stats={stats_dtype} running write-back={}",
            x.shape(),
            x.dtype(),
            mean_surrogate.is_some() || var_surrogate.is_some()
        );

        let request = TrainingRequest {
            mode,
            x: &x_cont,
            gamma: &gamma_cast,
            beta: &beta_cast,
            momentum: 1.0 - self.decay,
            eps: self.eps,
        };
        let result = {
            let running_mean = match mean_surrogate.as_mut() {
                Some(surrogate) => surrogate,
                None => &mut *self.running_mean,
            };
            let running_var = match var_surrogate.as_mut() {
                Some(surrogate) => surrogate,
                None => &mut *self.running_var,
            };
            self.backend
                .forward_training(request, running_mean, running_var)?
        };

        if let Some(updated) = &mean_surrogate {
            update_running(self.running_mean, updated)?;
        }
        if let Some(updated) = &var_surrogate {
            update_running(self.running_var, updated)?;
        }

        self.saved = Some(SavedActivations {
            x: x_cont,
            gamma: gamma.clone(),
            batch_mean: result.batch_mean,
            batch_inv_std: result.batch_inv_std,
            beta_dtype: beta.dtype(),
        });
        Ok(result.output)
    }

    /// Computes input and parameter gradients for `gout` from the saved forward state.
    ///
    /// Saved state is never modified, so backward can be repeated with different `gout` values.
    pub fn backward(&self, gout: &Tensor) -> BatchNormResult<BatchNormGradients> {
        let saved = self
            .saved
            .as_ref()
            .ok_or_else(|| BatchNormError::invalid_state("backward called before forward"))?;
        let mode = resolve_mode(&self.axis)?;

        ensure_shape("gout", gout, saved.x.shape())?;
        ensure_colocated(self.backend, ("x", &saved.x), &[("gout", gout)])?;
        ensure_float(&[("gout", gout)])?;

        let _scope = DeviceScope::enter(saved.x.device());

        let gout_cont = cast_contiguous(gout, Some(saved.x.dtype()));
        let stats_dtype = self.statistics_dtype(&saved.x, mode)?;
        let gamma_cast = cast_contiguous(&saved.gamma, Some(stats_dtype));
        log::debug!(
            "batch norm backward: mode={mode} x={} {} stats={stats_dtype}",
            saved.x.shape(),
            saved.x.dtype()
        );

        let output = self.backend.backward(BackwardRequest {
            mode,
            x: &saved.x,
            gout: &gout_cont,
            gamma: &gamma_cast,
            batch_mean: &saved.batch_mean,
            batch_inv_std: &saved.batch_inv_std,
            eps: self.eps,
        })?;

        let ggamma = if output.ggamma.dtype() != saved.gamma.dtype() {
            output.ggamma.astype(saved.gamma.dtype())
        } else {
            output.ggamma
        };
        let gbeta = if output.gbeta.dtype() != saved.beta_dtype {
            output.gbeta.astype(saved.beta_dtype)
        } else {
            output.gbeta
        };
        Ok(BatchNormGradients {
            gx: output.gx,
            ggamma,
            gbeta,
        })
    }

    fn statistics_dtype(&self, x: &Tensor, mode: BatchNormMode) -> BatchNormResult<DType> {
        let descriptor = self
            .backend
            .derive_statistics_descriptor(&TensorDescriptor::of(x), mode)?;
        Ok(descriptor.dtype)
    }
}

impl<B: ComputeBackend + ?Sized> fmt::Debug for BatchNormContext<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchNormContext")
            .field("backend", &self.backend.backend_name())
            .field("eps", &self.eps)
            .field("decay", &self.decay)
            .field("axis", &self.axis)
            .field("state", &self.state())
            .finish()
    }
}
