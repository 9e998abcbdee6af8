//! Precondition checks shared by every batch-normalization entry point.
//!
//! All checks run before any backend call so a rejected operation never mutates running statistics.

use crate::backend::ComputeBackend;
use crate::error::{BatchNormError, BatchNormResult};
use crate::tensor::{Shape, Tensor};

pub(crate) fn ensure_eps<B: ComputeBackend + ?Sized>(backend: &B, eps: f64) -> BatchNormResult<()> {
    let minimum = backend.minimum_epsilon();
    if eps.is_nan() || eps < minimum {
        return Err(BatchNormError::precision(format!(
            "minimum allowed epsilon is {minimum} but found {eps}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_decay(decay: f64) -> BatchNormResult<()> {
    if !(0.0..=1.0).contains(&decay) {
        return Err(BatchNormError::precision(format!(
            "decay must lie in [0, 1] but found {decay}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_contiguous(label: &str, tensor: &Tensor) -> BatchNormResult<()> {
    if !tensor.is_contiguous() {
        return Err(BatchNormError::contiguity(format!(
            "{label} must be contiguous to be updated in place"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_shape(label: &str, tensor: &Tensor, expected: &Shape) -> BatchNormResult<()> {
    if tensor.shape() != expected {
        return Err(BatchNormError::dimension_mismatch(format!(
            "{label} has shape {} but expected {expected}",
            tensor.shape()
        )));
    }
    Ok(())
}

/// Running statistics only need to hold one value per statistic, whatever their shape.
pub(crate) fn ensure_element_count(
    label: &str,
    tensor: &Tensor,
    expected: usize,
) -> BatchNormResult<()> {
    if tensor.len() != expected {
        return Err(BatchNormError::dimension_mismatch(format!(
            "{label} holds {} elements but {expected} statistics are required",
            tensor.len()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_float(operands: &[(&str, &Tensor)]) -> BatchNormResult<()> {
    for (label, tensor) in operands {
        if !tensor.dtype().is_float() {
            return Err(BatchNormError::precision(format!(
                "{label} must have a floating-point dtype, found {}",
                tensor.dtype()
            )));
        }
    }
    Ok(())
}

/// Checks that every operand lives on the device of `primary` and that the backend drives it.
pub(crate) fn ensure_colocated<B: ComputeBackend + ?Sized>(
    backend: &B,
    primary: (&str, &Tensor),
    operands: &[(&str, &Tensor)],
) -> BatchNormResult<()> {
    let (primary_label, primary) = primary;
    let device = primary.device();
    for (label, tensor) in operands {
        if tensor.device() != device {
            return Err(BatchNormError::device_mismatch(format!(
                "{label} is on {} but {primary_label} is on {device}",
                tensor.device()
            )));
        }
    }
    if !backend.supports_device(device) {
        return Err(BatchNormError::device_mismatch(format!(
            "backend {} cannot execute on {device}",
            backend.backend_name()
        )));
    }
    Ok(())
}
