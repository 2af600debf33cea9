//! Final estimator: classification and regression variants
//!
//! Two strategies are available: a depth-limited CART (`decision_tree`,
//! the default) and a gradient-descent linear model (`linear`, softmax for
//! classification and ridge for regression). Classification estimators
//! expose class probabilities so log-loss and ROC AUC scorers work.

use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use crate::scoring::Prediction;
use crate::task::Task;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
        /// Class distribution at the leaf (classification only)
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FittedModel {
    Tree { root: TreeNode },
    /// One weight row per output (classes, or a single row for regression);
    /// last column is the bias.
    Linear { weights: Vec<Vec<f64>> },
}

/// Final pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Estimator {
    task: Task,
    strategy: String,
    max_depth: usize,
    min_samples_split: usize,
    learning_rate: f64,
    n_iters: usize,
    alpha: f64,
    classes: Vec<i64>,
    fitted: Option<FittedModel>,
}

impl Estimator {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            strategy: "decision_tree".to_string(),
            max_depth: 5,
            min_samples_split: 2,
            learning_rate: 0.05,
            n_iters: 200,
            alpha: 0.0,
            classes: Vec::new(),
            fitted: None,
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// Human-readable configuration for diagnostic output.
    pub fn describe(&self) -> String {
        format!(
            "strategy: {}, max_depth: {}, min_samples_split: {}, learning_rate: {}, n_iters: {}, alpha: {}",
            self.strategy, self.max_depth, self.min_samples_split, self.learning_rate,
            self.n_iters, self.alpha
        )
    }

    pub fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "strategy" => {
                let s = value.as_str().ok_or_else(|| bad_value("est", name, value))?;
                if !["decision_tree", "linear"].contains(&s) {
                    return Err(PipetuneError::InvalidPipelineParams(format!(
                        "unknown estimator strategy '{s}'"
                    )));
                }
                self.strategy = s.to_string();
            }
            "max_depth" => {
                let v = value.as_int().filter(|&v| v >= 1).ok_or_else(|| {
                    bad_value("est", name, value)
                })?;
                self.max_depth = v as usize;
            }
            "min_samples_split" => {
                let v = value.as_int().filter(|&v| v >= 2).ok_or_else(|| {
                    bad_value("est", name, value)
                })?;
                self.min_samples_split = v as usize;
            }
            "learning_rate" => {
                let v = value.as_float().filter(|v| *v > 0.0).ok_or_else(|| {
                    bad_value("est", name, value)
                })?;
                self.learning_rate = v;
            }
            "n_iters" => {
                let v = value.as_int().filter(|&v| v >= 1).ok_or_else(|| {
                    bad_value("est", name, value)
                })?;
                self.n_iters = v as usize;
            }
            "alpha" => {
                let v = value.as_float().filter(|v| *v >= 0.0).ok_or_else(|| {
                    bad_value("est", name, value)
                })?;
                self.alpha = v;
            }
            _ => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "estimator has no parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(PipetuneError::EvaluationFailure(
                "estimator fit on empty or misaligned data".to_string(),
            ));
        }

        if self.task == Task::Classification {
            let mut classes: Vec<i64> = y.iter().map(|&v| v.round() as i64).collect();
            classes.sort_unstable();
            classes.dedup();
            self.classes = classes;
        }

        let model = match self.strategy.as_str() {
            "decision_tree" => {
                let rows: Vec<usize> = (0..x.nrows()).collect();
                FittedModel::Tree {
                    root: self.build_tree(x, y, &rows, 0),
                }
            }
            "linear" => FittedModel::Linear {
                weights: self.fit_linear(x, y),
            },
            other => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "unknown estimator strategy '{other}'"
                )))
            }
        };

        self.fitted = Some(model);
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Prediction> {
        let model = self.fitted.as_ref().ok_or_else(|| {
            PipetuneError::EvaluationFailure("estimator is not fitted".to_string())
        })?;

        match self.task {
            Task::Regression => {
                let values: Vec<f64> = (0..x.nrows())
                    .map(|i| self.predict_row(model, x, i)[0])
                    .collect();
                Ok(Prediction::from_values(values))
            }
            Task::Classification => {
                let mut values = Vec::with_capacity(x.nrows());
                let mut proba = Vec::with_capacity(x.nrows());
                for i in 0..x.nrows() {
                    let dist = self.predict_row(model, x, i);
                    let best = dist
                        .iter()
                        .enumerate()
                        .max_by(|a, b| {
                            a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .map(|(idx, _)| idx)
                        .unwrap_or(0);
                    values.push(self.classes[best] as f64);
                    proba.push(dist);
                }
                Ok(Prediction {
                    values,
                    proba: Some(proba),
                    classes: self.classes.clone(),
                })
            }
        }
    }

    /// For regression a single value; for classification the class
    /// probability distribution.
    fn predict_row(&self, model: &FittedModel, x: &Array2<f64>, row: usize) -> Vec<f64> {
        match model {
            FittedModel::Tree { root } => {
                let mut node = root;
                loop {
                    match node {
                        TreeNode::Leaf { value, distribution } => {
                            return if self.task == Task::Classification {
                                distribution.clone()
                            } else {
                                vec![*value]
                            };
                        }
                        TreeNode::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        } => {
                            node = if x[[row, *feature]] <= *threshold {
                                left
                            } else {
                                right
                            };
                        }
                    }
                }
            }
            FittedModel::Linear { weights } => {
                let logits: Vec<f64> = weights
                    .iter()
                    .map(|w| {
                        let mut z = w[x.ncols()];
                        for j in 0..x.ncols() {
                            z += w[j] * x[[row, j]];
                        }
                        z
                    })
                    .collect();
                if self.task == Task::Regression {
                    return vec![logits[0]];
                }
                softmax(&logits)
            }
        }
    }

    fn build_tree(&self, x: &Array2<f64>, y: &[f64], rows: &[usize], depth: usize) -> TreeNode {
        let impurity = self.impurity(y, rows);
        if depth >= self.max_depth || rows.len() < self.min_samples_split || impurity <= 1e-12 {
            return self.leaf(y, rows);
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in 0..x.ncols() {
            let mut values: Vec<f64> = rows.iter().map(|&i| x[[i, feature]]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            for pair in values.windows(2) {
                let threshold = (pair[0] + pair[1]) / 2.0;
                let (left, right): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
                if left.is_empty() || right.is_empty() {
                    continue;
                }
                let weighted = (left.len() as f64 * self.impurity(y, &left)
                    + right.len() as f64 * self.impurity(y, &right))
                    / rows.len() as f64;
                let gain = impurity - weighted;
                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, threshold, gain));
                }
            }
        }

        match best {
            None => self.leaf(y, rows),
            Some((feature, threshold, _)) => {
                let (left, right): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
                TreeNode::Split {
                    feature,
                    threshold,
                    left: Box::new(self.build_tree(x, y, &left, depth + 1)),
                    right: Box::new(self.build_tree(x, y, &right, depth + 1)),
                }
            }
        }
    }

    fn leaf(&self, y: &[f64], rows: &[usize]) -> TreeNode {
        match self.task {
            Task::Regression => {
                let mean = rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len().max(1) as f64;
                TreeNode::Leaf {
                    value: mean,
                    distribution: Vec::new(),
                }
            }
            Task::Classification => {
                let mut counts = vec![0.0; self.classes.len()];
                for &i in rows {
                    let label = y[i].round() as i64;
                    if let Some(idx) = self.classes.iter().position(|&c| c == label) {
                        counts[idx] += 1.0;
                    }
                }
                let total: f64 = counts.iter().sum();
                let distribution: Vec<f64> = counts.iter().map(|c| c / total.max(1.0)).collect();
                let best = distribution
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(idx, _)| idx)
                    .unwrap_or(0);
                TreeNode::Leaf {
                    value: self.classes[best] as f64,
                    distribution,
                }
            }
        }
    }

    /// Gini impurity for classification, variance for regression.
    fn impurity(&self, y: &[f64], rows: &[usize]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        match self.task {
            Task::Classification => {
                let mut counts = vec![0.0; self.classes.len()];
                for &i in rows {
                    let label = y[i].round() as i64;
                    if let Some(idx) = self.classes.iter().position(|&c| c == label) {
                        counts[idx] += 1.0;
                    }
                }
                let n = rows.len() as f64;
                1.0 - counts.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
            }
            Task::Regression => {
                let n = rows.len() as f64;
                let mean = rows.iter().map(|&i| y[i]).sum::<f64>() / n;
                rows.iter().map(|&i| (y[i] - mean) * (y[i] - mean)).sum::<f64>() / n
            }
        }
    }

    fn fit_linear(&self, x: &Array2<f64>, y: &[f64]) -> Vec<Vec<f64>> {
        let n = x.nrows();
        let d = x.ncols();
        let n_outputs = match self.task {
            Task::Regression => 1,
            Task::Classification => self.classes.len(),
        };
        let mut weights = vec![vec![0.0; d + 1]; n_outputs];

        for _ in 0..self.n_iters {
            let mut grads = vec![vec![0.0; d + 1]; n_outputs];
            for i in 0..n {
                let logits: Vec<f64> = weights
                    .iter()
                    .map(|w| {
                        let mut z = w[d];
                        for j in 0..d {
                            z += w[j] * x[[i, j]];
                        }
                        z
                    })
                    .collect();

                let errors: Vec<f64> = match self.task {
                    Task::Regression => vec![logits[0] - y[i]],
                    Task::Classification => {
                        let probs = softmax(&logits);
                        let label = y[i].round() as i64;
                        self.classes
                            .iter()
                            .zip(&probs)
                            .map(|(&c, &p)| p - if c == label { 1.0 } else { 0.0 })
                            .collect()
                    }
                };

                for (k, err) in errors.iter().enumerate() {
                    for j in 0..d {
                        grads[k][j] += err * x[[i, j]];
                    }
                    grads[k][d] += err;
                }
            }

            for k in 0..n_outputs {
                for j in 0..=d {
                    let reg = if j < d { self.alpha * weights[k][j] } else { 0.0 };
                    weights[k][j] -= self.learning_rate * (grads[k][j] / n as f64 + reg);
                }
            }
        }

        weights
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

fn bad_value(stage: &str, name: &str, value: &ParamValue) -> PipetuneError {
    PipetuneError::InvalidPipelineParams(format!(
        "invalid value '{value}' for parameter '{stage}__{name}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn separable_data() -> (Array2<f64>, Vec<f64>) {
        let x = arr2(&[
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [0.3, 0.1],
            [5.0, 5.1],
            [5.2, 4.9],
            [4.8, 5.0],
            [5.1, 5.3],
        ]);
        let y = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_tree_classifier_separates() {
        let (x, y) = separable_data();
        let mut est = Estimator::new(Task::Classification);
        est.fit(&x, &y).unwrap();

        let pred = est.predict(&x).unwrap();
        assert_eq!(pred.values, y);
        assert_eq!(pred.classes, vec![0, 1]);

        let proba = pred.proba.unwrap();
        for row in &proba {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_tree_regressor() {
        let x = arr2(&[[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]]);
        let y = vec![1.0, 1.0, 1.0, 10.0, 10.0, 10.0];
        let mut est = Estimator::new(Task::Regression);
        est.fit(&x, &y).unwrap();

        let pred = est.predict(&x).unwrap();
        assert!((pred.values[0] - 1.0).abs() < 1e-9);
        assert!((pred.values[5] - 10.0).abs() < 1e-9);
        assert!(pred.proba.is_none());
    }

    #[test]
    fn test_linear_classifier() {
        let (x, y) = separable_data();
        let mut est = Estimator::new(Task::Classification);
        est.set_param("strategy", &ParamValue::Str("linear".into())).unwrap();
        est.set_param("n_iters", &ParamValue::Int(500)).unwrap();
        est.fit(&x, &y).unwrap();

        let pred = est.predict(&x).unwrap();
        let correct = pred
            .values
            .iter()
            .zip(&y)
            .filter(|(p, t)| (**p - **t).abs() < 0.5)
            .count();
        assert!(correct >= 7);
    }

    #[test]
    fn test_set_param_validation() {
        let mut est = Estimator::new(Task::Classification);
        est.set_param("max_depth", &ParamValue::Int(3)).unwrap();
        assert!(est.set_param("max_depth", &ParamValue::Int(0)).is_err());
        assert!(est.set_param("strategy", &ParamValue::Str("xgboost".into())).is_err());
        assert!(est.set_param("no_such_param", &ParamValue::Int(1)).is_err());
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let (x, y) = separable_data();
        let mut est = Estimator::new(Task::Classification);
        est.set_param("max_depth", &ParamValue::Int(1)).unwrap();
        est.fit(&x, &y).unwrap();
        // depth-1 tree still separates this data
        let pred = est.predict(&x).unwrap();
        assert_eq!(pred.values, y);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let est = Estimator::new(Task::Regression);
        let x = arr2(&[[1.0]]);
        assert!(matches!(
            est.predict(&x),
            Err(PipetuneError::EvaluationFailure(_))
        ));
    }
}
