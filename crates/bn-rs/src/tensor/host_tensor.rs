//! Host-backed strided tensor implementing the array capability the engine consumes.

use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use rand::Rng;

use super::device::Device;
use super::dtype::DType;
use super::shape::Shape;
use super::storage::{read_scalar, write_scalar, StorageElement};

/// Strided view over a shared byte buffer.
///
/// Clones share storage; mutation goes through copy-on-write, so a clone never observes writes made
/// through another handle. The buffer holding `running_mean`/`running_var` is therefore mutated only
/// through the single `&mut Tensor` the caller hands out.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    dtype: DType,
    device: Device,
    data: Arc<Vec<u8>>,
}

impl Tensor {
    /// Constructs a contiguous tensor from typed values, validating the length against the shape.
    pub fn from_values<E: StorageElement>(shape: Shape, values: &[E]) -> Result<Self> {
        if values.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {}",
                values.len(),
                shape
            );
        }
        let width = E::DTYPE.size_in_bytes();
        let mut data = vec![0u8; values.len() * width];
        for (value, chunk) in values.iter().zip(data.chunks_exact_mut(width)) {
            value.write_le(chunk);
        }
        Ok(Self::from_raw(shape, E::DTYPE, Device::default(), data))
    }

    /// Constructs an `F32` tensor from raw values.
    pub fn from_f32(shape: Shape, data: Vec<f32>) -> Result<Self> {
        Self::from_values(shape, &data)
    }

    /// Constructs a tensor of `dtype`, rounding each `f64` value to that precision.
    pub fn from_f64(shape: Shape, dtype: DType, values: &[f64]) -> Result<Self> {
        if values.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {}",
                values.len(),
                shape
            );
        }
        let width = dtype.size_in_bytes();
        let mut data = vec![0u8; values.len() * width];
        for (&value, chunk) in values.iter().zip(data.chunks_exact_mut(width)) {
            write_scalar(dtype, value, chunk);
        }
        Ok(Self::from_raw(shape, dtype, Device::default(), data))
    }

    /// Returns a zero-initialized contiguous tensor.
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let bytes = shape.num_elements() * dtype.size_in_bytes();
        Self::from_raw(shape, dtype, Device::default(), vec![0u8; bytes])
    }

    /// Returns a contiguous tensor with every element set to `value`.
    pub fn full(shape: Shape, dtype: DType, value: f64) -> Self {
        let mut tensor = Self::zeros(shape, dtype);
        tensor.fill(value);
        tensor
    }

    /// Samples from `N(mean, std^2)` using the Box-Muller transform.
    pub fn randn(shape: Shape, dtype: DType, mean: f64, std: f64, rng: &mut impl Rng) -> Self {
        let len = shape.num_elements();
        let mut values = Vec::with_capacity(len);
        while values.len() < len {
            let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            values.push(mean + r * theta.cos() * std);
            if values.len() < len {
                values.push(mean + r * theta.sin() * std);
            }
        }
        let width = dtype.size_in_bytes();
        let mut data = vec![0u8; len * width];
        for (&value, chunk) in values.iter().zip(data.chunks_exact_mut(width)) {
            write_scalar(dtype, value, chunk);
        }
        Self::from_raw(shape, dtype, Device::default(), data)
    }

    fn from_raw(shape: Shape, dtype: DType, device: Device, data: Vec<u8>) -> Self {
        Tensor {
            strides: shape.contiguous_strides(),
            shape,
            offset: 0,
            dtype,
            device,
            data: Arc::new(data),
        }
    }

    /// Relabels the tensor as living on `device`.
    pub fn on_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Returns the total number of elements addressed by the view.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Per-axis element strides of the view.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of bytes a contiguous copy of the view occupies.
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype.size_in_bytes()
    }

    /// Whether the view is row-major and offset free, so its bytes can be copied directly.
    ///
    /// Strides of size-one axes are ignored since they never contribute to an address.
    pub fn is_contiguous(&self) -> bool {
        if self.offset != 0 {
            return false;
        }
        let expected = self.shape.contiguous_strides();
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&dim, (&actual, &expected))| dim <= 1 || actual == expected)
    }

    /// Reorders axes without moving data; the result is generally not contiguous.
    pub fn permute(&self, order: &[usize]) -> Result<Tensor> {
        let rank = self.shape.rank();
        ensure!(
            order.len() == rank,
            "permutation {:?} does not match rank {}",
            order,
            rank
        );
        let mut seen = vec![false; rank];
        for &axis in order {
            ensure!(
                axis < rank && !seen[axis],
                "invalid permutation {:?} for rank {}",
                order,
                rank
            );
            seen[axis] = true;
        }
        let dims = order.iter().map(|&a| self.shape.dims()[a]).collect::<Vec<_>>();
        let strides = order.iter().map(|&a| self.strides[a]).collect();
        Ok(Tensor {
            shape: Shape::new(dims),
            strides,
            offset: self.offset,
            dtype: self.dtype,
            device: self.device,
            data: Arc::clone(&self.data),
        })
    }

    /// Builds an arbitrary strided view into the same storage, checking bounds.
    pub fn with_strides(&self, shape: Shape, strides: Vec<usize>, offset: usize) -> Result<Tensor> {
        ensure!(
            strides.len() == shape.rank(),
            "stride count {} does not match rank {}",
            strides.len(),
            shape.rank()
        );
        let capacity = self.data.len() / self.dtype.size_in_bytes();
        if shape.num_elements() > 0 {
            let last = offset
                + shape
                    .dims()
                    .iter()
                    .zip(strides.iter())
                    .map(|(&dim, &stride)| (dim - 1) * stride)
                    .sum::<usize>();
            ensure!(
                last < capacity,
                "strided view reaches element {} but storage holds {}",
                last,
                capacity
            );
        }
        Ok(Tensor {
            shape,
            strides,
            offset,
            dtype: self.dtype,
            device: self.device,
            data: Arc::clone(&self.data),
        })
    }

    /// Storage element index of every logical element, in row-major order.
    fn element_indices(&self) -> Vec<usize> {
        let dims = self.shape.dims();
        let len = self.len();
        let mut indices = Vec::with_capacity(len);
        if len == 0 {
            return indices;
        }
        let mut counter = vec![0usize; dims.len()];
        for _ in 0..len {
            let index = self.offset
                + counter
                    .iter()
                    .zip(self.strides.iter())
                    .map(|(&i, &s)| i * s)
                    .sum::<usize>();
            indices.push(index);
            for axis in (0..dims.len()).rev() {
                counter[axis] += 1;
                if counter[axis] < dims[axis] {
                    break;
                }
                counter[axis] = 0;
            }
        }
        indices
    }

    /// Reads every element as `f64`, in logical row-major order regardless of strides.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let width = self.dtype.size_in_bytes();
        if self.is_contiguous() {
            return self
                .data
                .chunks_exact(width)
                .take(self.len())
                .map(|chunk| read_scalar(self.dtype, chunk))
                .collect();
        }
        self.element_indices()
            .into_iter()
            .map(|index| read_scalar(self.dtype, &self.data[index * width..]))
            .collect()
    }

    /// Reads every element as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.to_f64_vec().into_iter().map(|v| v as f32).collect()
    }

    /// Converts into a freshly allocated contiguous buffer of `dtype`.
    pub fn astype(&self, dtype: DType) -> Tensor {
        let values = self.to_f64_vec();
        let width = dtype.size_in_bytes();
        let mut data = vec![0u8; values.len() * width];
        for (&value, chunk) in values.iter().zip(data.chunks_exact_mut(width)) {
            write_scalar(dtype, value, chunk);
        }
        Self::from_raw(self.shape.clone(), dtype, self.device, data)
    }

    /// Returns a contiguous tensor, converted to `dtype` when one is given and differs.
    ///
    /// A view that is already contiguous in the requested dtype is returned as a cheap clone
    /// sharing storage.
    pub fn as_contiguous(&self, dtype: Option<DType>) -> Tensor {
        let target = dtype.unwrap_or(self.dtype);
        if target == self.dtype && self.is_contiguous() {
            return self.clone();
        }
        self.astype(target)
    }

    /// Returns the same view with a different shape of equal element count.
    pub fn reshape(&self, shape: Shape) -> Result<Tensor> {
        ensure!(
            shape.num_elements() == self.len(),
            "cannot reshape {} into {}",
            self.shape,
            shape
        );
        let base = self.as_contiguous(None);
        Ok(Tensor {
            strides: shape.contiguous_strides(),
            shape,
            ..base
        })
    }

    /// Raw bytes of a contiguous view.
    ///
    /// Panics when the view is not contiguous; callers check [`Tensor::is_contiguous`] first.
    pub fn bytes(&self) -> &[u8] {
        assert!(self.is_contiguous(), "raw bytes require a contiguous tensor");
        &self.data[..self.nbytes()]
    }

    /// Mutable raw bytes of a contiguous view, unsharing storage if another handle holds it.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        assert!(self.is_contiguous(), "raw bytes require a contiguous tensor");
        let nbytes = self.nbytes();
        &mut Arc::make_mut(&mut self.data)[..nbytes]
    }

    /// Overwrites the contents of a contiguous tensor from logical-order `f64` values.
    pub fn write_f64(&mut self, values: &[f64]) -> Result<()> {
        ensure!(
            values.len() == self.len(),
            "cannot write {} values into tensor of shape {}",
            values.len(),
            self.shape
        );
        ensure!(self.is_contiguous(), "cannot write into a non-contiguous view");
        let dtype = self.dtype;
        let width = dtype.size_in_bytes();
        for (&value, chunk) in values.iter().zip(self.bytes_mut().chunks_exact_mut(width)) {
            write_scalar(dtype, value, chunk);
        }
        Ok(())
    }

    /// Fills every element of a contiguous tensor with a constant value.
    pub fn fill(&mut self, value: f64) {
        let dtype = self.dtype;
        let width = dtype.size_in_bytes();
        for chunk in self.bytes_mut().chunks_exact_mut(width) {
            write_scalar(dtype, value, chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_f32_rejects_length_mismatch() {
        let err = Tensor::from_f32(Shape::new([2, 2]), vec![1.0; 3]).unwrap_err();
        assert!(err.to_string().contains("does not match shape"));
    }

    #[test]
    fn transpose_is_not_contiguous_but_reads_logically() {
        let t = Tensor::from_f32(Shape::new([2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let tt = t.permute(&[1, 0]).unwrap();
        assert!(!tt.is_contiguous());
        assert_eq!(tt.shape().dims(), &[3, 2]);
        assert_eq!(tt.to_f32_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let packed = tt.as_contiguous(None);
        assert!(packed.is_contiguous());
        assert_eq!(packed.to_f32_vec(), tt.to_f32_vec());
    }

    #[test]
    fn size_one_axes_do_not_break_contiguity() {
        let t = Tensor::zeros(Shape::new([1, 3, 1, 1]), DType::F32);
        let view = t
            .with_strides(Shape::new([1, 3, 1, 1]), vec![99, 1, 7, 7], 0)
            .unwrap();
        assert!(view.is_contiguous());
    }

    #[test]
    fn astype_rounds_into_half_precision() {
        let t = Tensor::from_f64(Shape::new([2]), DType::F64, &[0.1, 1.0 / 3.0]).unwrap();
        let half = t.astype(DType::F16);
        assert_eq!(half.dtype(), DType::F16);
        assert_eq!(half.nbytes(), 4);
        let back = half.to_f64_vec();
        assert!((back[0] - 0.1).abs() < 1e-3);
        assert!((back[1] - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn clones_do_not_observe_writes_through_other_handles() {
        let mut a = Tensor::full(Shape::new([4]), DType::F32, 1.0);
        let b = a.clone();
        a.fill(2.0);
        assert_eq!(a.to_f32_vec(), vec![2.0; 4]);
        assert_eq!(b.to_f32_vec(), vec![1.0; 4]);
    }

    #[test]
    fn strided_view_out_of_bounds_is_rejected() {
        let t = Tensor::zeros(Shape::new([4]), DType::F32);
        assert!(t.with_strides(Shape::new([4]), vec![2], 0).is_err());
    }
}
