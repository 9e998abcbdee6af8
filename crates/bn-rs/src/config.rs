use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hyperparameters of one batch-normalization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormConfig {
    /// Added to the variance before taking the square root.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Weight of the previous running statistic in each update.
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Reduction axes; `[0]` for dense inputs, `[0, 2, 3]` for NCHW feature maps.
    #[serde(default = "default_axis")]
    pub axis: Vec<usize>,
}

fn default_eps() -> f64 {
    2e-5
}

fn default_decay() -> f64 {
    0.9
}

fn default_axis() -> Vec<usize> {
    vec![0, 2, 3]
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            decay: default_decay(),
            axis: default_axis(),
        }
    }
}

impl BatchNormConfig {
    /// Defaults for `(N, K)` inputs normalized per activation.
    pub fn dense() -> Self {
        Self {
            axis: vec![0],
            ..Self::default()
        }
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        serde_json::from_str(data).context("failed to parse batch norm config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = BatchNormConfig::from_json_str(r#"{"decay": 0.95}"#).unwrap();
        assert_eq!(cfg.decay, 0.95);
        assert_eq!(cfg.eps, 2e-5);
        assert_eq!(cfg.axis, vec![0, 2, 3]);
    }

    #[test]
    fn dense_config_reduces_batch_axis_only() {
        let cfg = BatchNormConfig::dense();
        assert_eq!(cfg.axis, vec![0]);
        assert_eq!(cfg.decay, BatchNormConfig::default().decay);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = BatchNormConfig::from_json_str("{\"eps\": \"small\"}").unwrap_err();
        assert!(err.to_string().contains("batch norm config"));
    }
}
