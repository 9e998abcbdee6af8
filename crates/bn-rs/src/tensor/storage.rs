//! Defines the scalar element trait implemented by host-side tensor storages.
//!
//! Every element type knows its [`DType`] tag and how to move between its little-endian byte
//! encoding and `f64`, which is the interchange precision used when converting buffers.

use half::{bf16, f16};

use super::dtype::DType;

/// Trait describing a scalar that can live inside a [`Tensor`](super::Tensor) byte buffer.
pub trait StorageElement: Copy + Default + Send + Sync + 'static {
    /// Dtype tag recorded on tensors built from this element type.
    const DTYPE: DType;

    /// Converts from a 64-bit float, rounding to the nearest representable value.
    fn from_f64(v: f64) -> Self;
    /// Widens the element into a 64-bit float.
    fn to_f64(self) -> f64;
    /// Decodes the element from exactly `DTYPE.size_in_bytes()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
    /// Encodes the element into exactly `DTYPE.size_in_bytes()` little-endian bytes.
    fn write_le(self, out: &mut [u8]);
}

macro_rules! impl_native_element {
    ($ty:ty, $dtype:expr, $n:expr) => {
        impl StorageElement for $ty {
            const DTYPE: DType = $dtype;

            fn from_f64(v: f64) -> Self {
                v as $ty
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..$n].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_native_element!(f32, DType::F32, 4);
impl_native_element!(f64, DType::F64, 8);
impl_native_element!(i32, DType::I32, 4);

macro_rules! impl_half_element {
    ($ty:ty, $dtype:expr) => {
        impl StorageElement for $ty {
            const DTYPE: DType = $dtype;

            fn from_f64(v: f64) -> Self {
                <$ty>::from_f64(v)
            }

            fn to_f64(self) -> f64 {
                <$ty>::to_f64(self)
            }

            fn read_le(bytes: &[u8]) -> Self {
                <$ty>::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]))
            }

            fn write_le(self, out: &mut [u8]) {
                out[..2].copy_from_slice(&self.to_bits().to_le_bytes());
            }
        }
    };
}

impl_half_element!(f16, DType::F16);
impl_half_element!(bf16, DType::BF16);

/// Decodes one scalar of `dtype` from the start of `bytes`.
pub(crate) fn read_scalar(dtype: DType, bytes: &[u8]) -> f64 {
    match dtype {
        DType::F16 => f16::read_le(bytes).to_f64(),
        DType::BF16 => bf16::read_le(bytes).to_f64(),
        DType::F32 => f64::from(f32::read_le(bytes)),
        DType::F64 => f64::read_le(bytes),
        DType::I32 => f64::from(i32::read_le(bytes)),
    }
}

/// Rounds `value` to `dtype` and encodes it at the start of `out`.
pub(crate) fn write_scalar(dtype: DType, value: f64, out: &mut [u8]) {
    match dtype {
        DType::F16 => <f16 as StorageElement>::from_f64(value).write_le(out),
        DType::BF16 => <bf16 as StorageElement>::from_f64(value).write_le(out),
        DType::F32 => <f32 as StorageElement>::from_f64(value).write_le(out),
        DType::F64 => value.write_le(out),
        DType::I32 => <i32 as StorageElement>::from_f64(value).write_le(out),
    }
}

/// Rounds `value` through `dtype` and widens it back, modelling a store/load pair.
pub fn round_to(dtype: DType, value: f64) -> f64 {
    let mut scratch = [0u8; 8];
    write_scalar(dtype, value, &mut scratch);
    read_scalar(dtype, &scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_roundtrip_loses_precision_as_expected() {
        let value = 0.1f64;
        let rounded = round_to(DType::F16, value);
        assert!((rounded - value).abs() < 1e-3);
        assert_ne!(rounded, value);
        assert_eq!(round_to(DType::F64, value), value);
    }

    #[test]
    fn bf16_keeps_f32_exponent_range() {
        assert!(round_to(DType::BF16, 1.0e30).is_finite());
        assert!(round_to(DType::F16, 1.0e30).is_infinite());
    }

    #[test]
    fn int32_truncates_toward_zero() {
        assert_eq!(round_to(DType::I32, 2.9), 2.0);
        assert_eq!(round_to(DType::I32, -2.9), -2.0);
    }
}
