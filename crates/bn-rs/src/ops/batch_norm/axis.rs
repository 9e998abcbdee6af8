//! Maps reduction axes to a normalization mode.

use crate::backend::BatchNormMode;
use crate::error::{BatchNormError, BatchNormResult};

const ACCEPTED: &str = "expected (0,) for per-activation or (0, 2, 3) / (0, 2, 3, 4) for spatial";

/// Resolves the normalization mode implied by `axis`.
///
/// `(0,)` normalizes every activation independently (fully-connected inputs), `(0, 2, 3)` and
/// `(0, 2, 3, 4)` share one statistic per channel across the spatial dimensions of 4-D and 5-D
/// inputs. Anything else is rejected.
pub fn resolve_mode(axis: &[usize]) -> BatchNormResult<BatchNormMode> {
    match axis {
        [0] => Ok(BatchNormMode::PerActivation),
        [0, 2, 3] | [0, 2, 3, 4] => Ok(BatchNormMode::Spatial),
        _ => Err(BatchNormError::invalid_axis(axis, ACCEPTED)),
    }
}

/// Checks that an already-resolved axis set fits an input of rank `rank`.
///
/// Spatial axes must cover every trailing dimension, so `(0, 2, 3)` requires a 4-D input and
/// `(0, 2, 3, 4)` a 5-D one.
pub fn check_rank(mode: BatchNormMode, axis: &[usize], rank: usize) -> BatchNormResult<()> {
    if rank < 2 {
        return Err(BatchNormError::invalid_axis(
            axis,
            format!("input must have at least 2 dimensions, got {rank}"),
        ));
    }
    if let Some(&out_of_range) = axis.iter().find(|&&a| a >= rank) {
        return Err(BatchNormError::invalid_axis(
            axis,
            format!("axis {out_of_range} is out of range for a {rank}-D input"),
        ));
    }
    if mode == BatchNormMode::Spatial && axis.len() + 1 != rank {
        return Err(BatchNormError::invalid_axis(
            axis,
            format!("spatial normalization must reduce every spatial axis of a {rank}-D input"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn batch_axis_only_is_per_activation() {
        assert_eq!(resolve_mode(&[0]).unwrap(), BatchNormMode::PerActivation);
    }

    #[test]
    fn spatial_axes_are_spatial() {
        assert_eq!(resolve_mode(&[0, 2, 3]).unwrap(), BatchNormMode::Spatial);
        assert_eq!(resolve_mode(&[0, 2, 3, 4]).unwrap(), BatchNormMode::Spatial);
    }

    #[test]
    fn other_axis_sets_are_rejected() {
        let cases: [&[usize]; 7] = [&[], &[1], &[0, 1], &[0, 2], &[0, 3, 2], &[2, 3], &[0, 2, 3, 4, 5]];
        for axis in cases {
            let err = resolve_mode(axis).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidAxis, "axis {axis:?}");
        }
    }

    #[test]
    fn spatial_axes_must_cover_trailing_dims() {
        assert!(check_rank(BatchNormMode::Spatial, &[0, 2, 3], 4).is_ok());
        assert!(check_rank(BatchNormMode::Spatial, &[0, 2, 3], 5).is_err());
        assert!(check_rank(BatchNormMode::Spatial, &[0, 2, 3, 4], 4).is_err());
        assert!(check_rank(BatchNormMode::PerActivation, &[0], 4).is_ok());
        assert!(check_rank(BatchNormMode::PerActivation, &[0], 1).is_err());
    }
}
