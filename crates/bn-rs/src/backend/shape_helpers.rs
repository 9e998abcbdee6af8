//! Shared shape helpers used across backends.

/// Computes the element count for `dims`, reporting overflow through `on_overflow`.
pub fn checked_element_count_or_error<E, F>(dims: &[usize], mut on_overflow: F) -> Result<usize, E>
where
    F: FnMut() -> E,
{
    let mut count = 1usize;
    for dim in dims {
        count = count.checked_mul(*dim).ok_or_else(&mut on_overflow)?;
    }
    Ok(count)
}

/// Number of input elements folded into each statistic when reducing `axes`.
///
/// Returns `None` if the count does not fit in `usize`.
pub fn reduced_count(dims: &[usize], axes: &[usize]) -> Option<usize> {
    dims.iter()
        .enumerate()
        .filter(|(axis, _)| axes.contains(axis))
        .try_fold(1usize, |count, (_, &dim)| count.checked_mul(dim))
}

/// Maps every row-major element of `dims` to the flat index of its statistic in the
/// keepdims-reduced shape obtained by collapsing `axes`.
pub fn statistic_index_map(dims: &[usize], axes: &[usize]) -> Vec<usize> {
    let mut reduced_strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        if axes.contains(&axis) {
            continue;
        }
        reduced_strides[axis] = stride;
        stride *= dims[axis];
    }

    let len = dims.iter().product::<usize>();
    let mut map = Vec::with_capacity(len);
    if len == 0 {
        return map;
    }
    let mut counter = vec![0usize; dims.len()];
    for _ in 0..len {
        map.push(
            counter
                .iter()
                .zip(reduced_strides.iter())
                .map(|(&i, &s)| i * s)
                .sum(),
        );
        for axis in (0..dims.len()).rev() {
            counter[axis] += 1;
            if counter[axis] < dims[axis] {
                break;
            }
            counter[axis] = 0;
        }
    }
    map
}
