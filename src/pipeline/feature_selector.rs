//! Optional feature-selection stage
//!
//! Scores columns of the encoded matrix and discards the weakest fraction.
//! Variance scoring ignores the target; correlation scoring ranks columns by
//! absolute Pearson correlation with it and is costly enough on wide data
//! that pipelines using it are cached.

use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Variance,
    Correlation,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Variance => "variance",
            Self::Correlation => "correlation",
        }
    }
}

/// Keeps the strongest columns of the encoded matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    strategy: SelectionStrategy,
    /// Fraction of columns to discard, in [0, 1)
    threshold: f64,
    keep_indices: Vec<usize>,
    is_fitted: bool,
}

impl Default for FeatureSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureSelector {
    pub fn new() -> Self {
        Self {
            strategy: SelectionStrategy::Variance,
            threshold: 0.3,
            keep_indices: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    pub fn describe(&self) -> String {
        format!(
            "strategy: {}, threshold: {}",
            self.strategy.as_str(),
            self.threshold
        )
    }

    pub fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "strategy" => {
                let s = value.as_str().ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for parameter 'fs__strategy'"
                    ))
                })?;
                self.strategy = match s {
                    "variance" => SelectionStrategy::Variance,
                    "correlation" => SelectionStrategy::Correlation,
                    other => {
                        return Err(PipetuneError::InvalidPipelineParams(format!(
                            "unknown selection strategy '{other}'"
                        )))
                    }
                };
            }
            "threshold" => {
                let t = value.as_float().ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for parameter 'fs__threshold'"
                    ))
                })?;
                if !(0.0..1.0).contains(&t) {
                    return Err(PipetuneError::InvalidPipelineParams(format!(
                        "threshold must be in [0, 1), got {t}"
                    )));
                }
                self.threshold = t;
            }
            _ => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "feature selector has no parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let n_cols = x.ncols();
        if n_cols == 0 {
            return Err(PipetuneError::EvaluationFailure(
                "cannot select features from an empty matrix".to_string(),
            ));
        }

        let scores: Vec<f64> = match self.strategy {
            SelectionStrategy::Variance => {
                (0..n_cols).map(|c| variance(&x.column(c).to_vec())).collect()
            }
            SelectionStrategy::Correlation => (0..n_cols)
                .map(|c| {
                    let col = x.column(c).to_vec();
                    pearson(&col, y).abs()
                })
                .collect(),
        };

        let n_keep = (n_cols - (self.threshold * n_cols as f64).floor() as usize).max(1);
        let mut order: Vec<usize> = (0..n_cols).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(n_keep);
        order.sort_unstable();
        self.keep_indices = order;
        self.is_fitted = true;
        Ok(())
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(PipetuneError::EvaluationFailure(
                "feature selector is not fitted".to_string(),
            ));
        }
        if let Some(&max) = self.keep_indices.iter().max() {
            if max >= x.ncols() {
                return Err(PipetuneError::EvaluationFailure(format!(
                    "feature selector fitted on wider matrix: column {max} out of {}",
                    x.ncols()
                )));
            }
        }
        Ok(x.select(ndarray::Axis(1), &self.keep_indices))
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<Array2<f64>> {
        self.fit(x, y)?;
        self.transform(x)
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_variance_drops_constant_column() {
        // column 1 is constant
        let x = array![[1.0, 5.0, 10.0], [2.0, 5.0, 20.0], [3.0, 5.0, 30.0]];
        let y = vec![0.0, 1.0, 2.0];

        let mut selector = FeatureSelector::new();
        selector
            .set_param("threshold", &ParamValue::Float(0.4))
            .unwrap();
        let out = selector.fit_transform(&x, &y).unwrap();

        assert_eq!(out.ncols(), 2);
        assert_eq!(out[[0, 0]], 1.0);
        assert_eq!(out[[0, 1]], 10.0);
    }

    #[test]
    fn test_correlation_keeps_predictive_column() {
        // column 0 tracks the target, column 1 is noise-like
        let x = array![
            [1.0, 3.0],
            [2.0, -1.0],
            [3.0, 2.0],
            [4.0, -2.0],
            [5.0, 0.5]
        ];
        let y = vec![10.0, 20.0, 30.0, 40.0, 50.0];

        let mut selector = FeatureSelector::new();
        selector
            .set_param("strategy", &ParamValue::Str("correlation".into()))
            .unwrap();
        selector
            .set_param("threshold", &ParamValue::Float(0.5))
            .unwrap();
        let out = selector.fit_transform(&x, &y).unwrap();

        assert_eq!(out.ncols(), 1);
        assert_eq!(out[[0, 0]], 1.0);
    }

    #[test]
    fn test_keeps_at_least_one_column() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = vec![0.0, 1.0, 0.0];
        let mut selector = FeatureSelector::new();
        selector
            .set_param("threshold", &ParamValue::Float(0.99))
            .unwrap();
        let out = selector.fit_transform(&x, &y).unwrap();
        assert_eq!(out.ncols(), 1);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut selector = FeatureSelector::new();
        assert!(selector
            .set_param("threshold", &ParamValue::Float(1.0))
            .is_err());
        assert!(selector
            .set_param("threshold", &ParamValue::Float(-0.1))
            .is_err());
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let x = array![[1.0], [2.0]];
        let selector = FeatureSelector::new();
        assert!(selector.transform(&x).is_err());
    }
}
