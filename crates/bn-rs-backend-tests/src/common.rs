use bn_rs::backend::shape_helpers::statistic_index_map;
use bn_rs::tensor::{DType, Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const ATOL: f64 = 1e-5;
pub const RTOL: f64 = 1e-5;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vec(rng: &mut StdRng, len: usize, lo: f64, hi: f64) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(lo..hi)).collect()
}

pub fn tensor(shape: &[usize], dtype: DType, values: &[f64]) -> Tensor {
    Tensor::from_f64(Shape::new(shape.to_vec()), dtype, values).expect("valid tensor")
}

pub fn random_tensor(rng: &mut StdRng, shape: &[usize], dtype: DType, lo: f64, hi: f64) -> Tensor {
    let len = shape.iter().product();
    tensor(shape, dtype, &random_vec(rng, len, lo, hi))
}

/// Affine parameters and running statistics for an input of `x_shape` reduced over `axis`.
pub struct Params {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
}

impl Params {
    pub fn identity(x_shape: &[usize], axis: &[usize], dtype: DType) -> Self {
        let shape = Shape::new(x_shape.to_vec()).reduce_keepdims(axis);
        Self {
            gamma: Tensor::full(shape.clone(), dtype, 1.0),
            beta: Tensor::zeros(shape.clone(), dtype),
            running_mean: Tensor::zeros(shape.clone(), dtype),
            running_var: Tensor::full(shape, dtype, 1.0),
        }
    }

    pub fn random(rng: &mut StdRng, x_shape: &[usize], axis: &[usize], dtype: DType) -> Self {
        let shape = Shape::new(x_shape.to_vec()).reduce_keepdims(axis);
        let mut params = Self::identity(x_shape, axis, dtype);
        params.gamma = random_tensor(rng, shape.dims(), dtype, 0.5, 2.0);
        params.beta = random_tensor(rng, shape.dims(), dtype, -1.0, 1.0);
        params
    }
}

/// Batch moments computed independently of any backend: `(mean, biased variance, count)`.
pub fn reference_moments(x: &[f64], dims: &[usize], axis: &[usize]) -> (Vec<f64>, Vec<f64>, usize) {
    let map = statistic_index_map(dims, axis);
    let num_stats = map.iter().copied().max().map_or(0, |max| max + 1);
    let count = x.len() / num_stats.max(1);
    let mut mean = vec![0.0; num_stats];
    for (&v, &s) in x.iter().zip(&map) {
        mean[s] += v / count as f64;
    }
    let mut var = vec![0.0; num_stats];
    for (&v, &s) in x.iter().zip(&map) {
        var[s] += (v - mean[s]).powi(2) / count as f64;
    }
    (mean, var, count)
}

/// `gamma * (x - mean) / sqrt(var + eps) + beta`, broadcasting statistics over `axis`.
#[allow(clippy::too_many_arguments)]
pub fn reference_normalize(
    x: &[f64],
    dims: &[usize],
    axis: &[usize],
    gamma: &[f64],
    beta: &[f64],
    mean: &[f64],
    var: &[f64],
    eps: f64,
) -> Vec<f64> {
    let map = statistic_index_map(dims, axis);
    x.iter()
        .zip(&map)
        .map(|(&v, &s)| gamma[s] * (v - mean[s]) / (var[s] + eps).sqrt() + beta[s])
        .collect()
}

pub fn assert_close(expected: &[f64], actual: &[f64]) {
    assert_close_tol(expected, actual, ATOL, RTOL);
}

pub fn assert_close_tol(expected: &[f64], actual: &[f64], atol: f64, rtol: f64) {
    assert_eq!(expected.len(), actual.len());
    for (idx, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        let diff = (e - a).abs();
        let thresh = atol + rtol * e.abs().max(a.abs());
        assert!(
            diff <= thresh,
            "value mismatch at index {idx}: expected {e}, actual {a}, diff {diff}, thresh {thresh}"
        );
    }
}
