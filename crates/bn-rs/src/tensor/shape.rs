//! Lightweight wrapper for tensor shapes and dimension bookkeeping.

use std::fmt;

use crate::backend::shape_helpers::checked_element_count_or_error;

/// Stores the logical dimensions of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    ///
    /// Panics if `dims` is empty or its element count overflows `usize`.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        let dims = dims.into();
        assert!(!dims.is_empty(), "shape must have at least one dimension");
        if let Err(dims) = checked_element_count_or_error(&dims, || dims.clone()) {
            panic!("shape {dims:?} has more elements than fit in usize");
        }
        Shape { dims }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    ///
    /// `Shape::new` rejects overflowing dims, and `reduce_keepdims` only shrinks them.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().fold(1usize, |count, &dim| count.saturating_mul(dim))
    }

    /// Collapses every axis listed in `axes` to size one (keepdims reduction).
    ///
    /// Axes outside the rank are ignored; callers validate them beforehand.
    pub fn reduce_keepdims(&self, axes: &[usize]) -> Shape {
        let dims = self
            .dims
            .iter()
            .enumerate()
            .map(|(axis, &dim)| if axes.contains(&axis) { 1 } else { dim })
            .collect::<Vec<_>>();
        Shape { dims }
    }

    /// Row-major element strides for a densely packed tensor of this shape.
    pub fn contiguous_strides(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.dims.len()];
        let mut stride = 1usize;
        for axis in (0..self.dims.len()).rev() {
            strides[axis] = stride;
            stride *= self.dims[axis];
        }
        strides
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_keepdims_collapses_listed_axes() {
        let shape = Shape::new([2, 3, 4, 4]);
        assert_eq!(shape.reduce_keepdims(&[0, 2, 3]).dims(), &[1, 3, 1, 1]);
        assert_eq!(shape.reduce_keepdims(&[0]).dims(), &[1, 3, 4, 4]);
    }

    #[test]
    fn contiguous_strides_are_row_major() {
        assert_eq!(Shape::new([2, 3, 4]).contiguous_strides(), vec![12, 4, 1]);
    }

    #[test]
    #[should_panic(expected = "more elements than fit in usize")]
    fn overflowing_dims_are_rejected() {
        let _ = Shape::new([usize::MAX, 2]);
    }

    #[test]
    fn display_matches_tuple_notation() {
        assert_eq!(Shape::new([2, 3]).to_string(), "(2, 3)");
        assert_eq!(Shape::new([5]).to_string(), "(5,)");
    }
}
