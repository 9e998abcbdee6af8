//! Precision reconciliation between caller storage and the backend's statistics dtype.

use crate::error::{BatchNormError, BatchNormResult};
use crate::tensor::{DType, Tensor};

/// Returns a contiguous copy of `tensor`, converted to `dtype` when one is given.
///
/// Never mutates its input. Already-contiguous tensors in the target dtype come back as a cheap
/// handle sharing storage.
pub fn cast_contiguous(tensor: &Tensor, dtype: Option<DType>) -> Tensor {
    tensor.as_contiguous(dtype)
}

/// Surrogate a running-statistics buffer must be computed into, if its dtype differs from the
/// backend's statistics dtype. `None` means the backend can update the buffer directly.
pub(crate) fn running_surrogate(running: &Tensor, stats_dtype: DType) -> Option<Tensor> {
    (running.dtype() != stats_dtype).then(|| running.astype(stats_dtype))
}

/// Writes `updated` back into `running` when the two differ in precision.
///
/// When the dtypes match the backend already wrote into `running` itself and nothing happens.
/// Otherwise `updated` is rounded to `running`'s dtype and its bytes are copied over the
/// caller-owned storage.
pub fn update_running(running: &mut Tensor, updated: &Tensor) -> BatchNormResult<()> {
    if !running.is_contiguous() || !updated.is_contiguous() {
        return Err(BatchNormError::contiguity(
            "running statistics and their updated values must be contiguous for write-back",
        ));
    }
    if running.device() != updated.device() {
        return Err(BatchNormError::device_mismatch(format!(
            "running statistics live on {} but updated values on {}",
            running.device(),
            updated.device()
        )));
    }
    if running.len() != updated.len() {
        return Err(BatchNormError::dimension_mismatch(format!(
            "running statistics hold {} elements but updated values hold {}",
            running.len(),
            updated.len()
        )));
    }
    if running.dtype() == updated.dtype() {
        return Ok(());
    }

    let casted_back = updated.astype(running.dtype());
    running.bytes_mut().copy_from_slice(casted_back.bytes());
    log::debug!(
        "wrote back {} running statistics from {} to {}",
        running.len(),
        updated.dtype(),
        running.dtype()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tensor::{Device, Shape};

    #[test]
    fn cast_keeps_values_and_yields_contiguous_tensor() {
        let t = Tensor::from_f32(Shape::new([2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let transposed = t.permute(&[1, 0]).unwrap();
        let cast = cast_contiguous(&transposed, Some(DType::F64));
        assert!(cast.is_contiguous());
        assert_eq!(cast.dtype(), DType::F64);
        assert_eq!(cast.to_f64_vec(), vec![1.0, 3.0, 2.0, 4.0]);
        assert!(!transposed.is_contiguous());
    }

    #[test]
    fn matching_dtypes_leave_running_untouched() {
        let mut running = Tensor::full(Shape::new([3]), DType::F32, 1.0);
        let updated = Tensor::full(Shape::new([3]), DType::F32, 5.0);
        update_running(&mut running, &updated).unwrap();
        assert_eq!(running.to_f32_vec(), vec![1.0; 3]);
    }

    #[test]
    fn differing_dtypes_write_rounded_values() {
        let mut running = Tensor::zeros(Shape::new([3]), DType::F16);
        let values = [0.1, 1.0 / 3.0, 1234.567];
        let updated = Tensor::from_f64(Shape::new([3]), DType::F32, &values).unwrap();
        update_running(&mut running, &updated).unwrap();

        let expected = updated.astype(DType::F16).to_f64_vec();
        assert_eq!(running.to_f64_vec(), expected);
        assert_eq!(running.dtype(), DType::F16);
    }

    #[test]
    fn write_back_rejects_strided_buffers() {
        let base = Tensor::full(Shape::new([2, 2]), DType::F16, 3.0);
        let mut running = base.permute(&[1, 0]).unwrap();
        let updated = Tensor::zeros(Shape::new([2, 2]), DType::F32);
        let err = update_running(&mut running, &updated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contiguity);
        assert_eq!(running.to_f64_vec(), vec![3.0; 4]);

        let mut running = Tensor::zeros(Shape::new([2, 2]), DType::F16);
        let strided_update = updated.permute(&[1, 0]).unwrap();
        let err = update_running(&mut running, &strided_update).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contiguity);
    }

    #[test]
    fn write_back_requires_colocated_buffers() {
        let mut running = Tensor::zeros(Shape::new([2]), DType::F16);
        let updated = Tensor::zeros(Shape::new([2]), DType::F32).on_device(Device::cpu(1));
        let err = update_running(&mut running, &updated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceMismatch);
    }

    #[test]
    fn surrogate_is_only_built_on_dtype_change() {
        let running = Tensor::zeros(Shape::new([2]), DType::F32);
        assert!(running_surrogate(&running, DType::F32).is_none());
        let surrogate = running_surrogate(&running, DType::F64).unwrap();
        assert_eq!(surrogate.dtype(), DType::F64);
    }
}
