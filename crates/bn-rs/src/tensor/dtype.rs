//! Enumerates the scalar element types understood by the engine and its backends.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad classification of a dtype, used for precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeKind {
    Float,
    Int,
}

/// Logical dtype identifier shared between host tensors and backend descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 16-bit bfloat16 precision as used by many accelerators.
    BF16,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point, used by reference kernels and gradient checks.
    F64,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn kind(self) -> DTypeKind {
        match self {
            DType::F16 | DType::BF16 | DType::F32 | DType::F64 => DTypeKind::Float,
            DType::I32 => DTypeKind::Int,
        }
    }

    pub fn is_float(self) -> bool {
        self.kind() == DTypeKind::Float
    }

    /// Relative precision of the format, used to scale numeric tolerances.
    pub fn epsilon(self) -> f64 {
        match self {
            DType::F16 => f64::from(half::f16::EPSILON),
            DType::BF16 => f64::from(half::bf16::EPSILON),
            DType::F32 => f64::from(f32::EPSILON),
            DType::F64 => f64::EPSILON,
            DType::I32 => 1.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I32 => "int32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_formats_are_two_bytes() {
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn only_int32_is_not_float() {
        for dtype in [DType::F16, DType::BF16, DType::F32, DType::F64] {
            assert!(dtype.is_float(), "{dtype} should be float");
        }
        assert_eq!(DType::I32.kind(), DTypeKind::Int);
    }

    #[test]
    fn dtype_parses_from_lowercase_json() {
        let dtype: DType = serde_json::from_str("\"bf16\"").unwrap();
        assert_eq!(dtype, DType::BF16);
    }
}
