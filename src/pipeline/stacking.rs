//! Stacking layer: out-of-fold meta-features from a pool of base learners
//!
//! At fit time each base learner produces out-of-fold predictions over the
//! training matrix, so the meta-features never leak the row they describe.
//! The base learners are then refitted on the full matrix for transform-time
//! use on unseen rows. Fitting the pool across folds is the most expensive
//! stage of a pipeline, which is why any stacking layer forces caching.

use crate::cv::{CrossValidator, CvStrategy};
use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use crate::pipeline::estimator::Estimator;
use crate::scoring::Prediction;
use crate::task::Task;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Depths of the base tree pool
const BASE_DEPTHS: [i64; 2] = [3, 5];

/// One layer of stacked meta-features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingLayer {
    task: Task,
    n_folds: usize,
    /// Forward the input columns alongside the meta-features
    copy: bool,
    random_state: u64,
    classes: Vec<i64>,
    /// Base pool refitted on the full training matrix, for transform
    fitted_models: Vec<Estimator>,
    is_fitted: bool,
}

impl StackingLayer {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            n_folds: 5,
            copy: true,
            random_state: 1,
            classes: Vec::new(),
            fitted_models: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn describe(&self) -> String {
        format!("n_folds: {}, copy: {}", self.n_folds, self.copy)
    }

    pub fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_folds" => {
                let v = value.as_int().filter(|&v| v >= 2).ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for stacking parameter 'n_folds'"
                    ))
                })?;
                self.n_folds = v as usize;
            }
            "copy" => {
                self.copy = value.as_bool().ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for stacking parameter 'copy'"
                    ))
                })?;
            }
            "random_state" => {
                let v = value.as_int().filter(|&v| v >= 0).ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for stacking parameter 'random_state'"
                    ))
                })?;
                self.random_state = v as u64;
            }
            _ => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "stacking layer has no parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    /// Meta-feature columns contributed by one base learner.
    fn meta_width(&self) -> usize {
        match self.task {
            Task::Regression => 1,
            // one probability column per class, the last one dropped since
            // the probabilities sum to one
            Task::Classification => self.classes.len().saturating_sub(1).max(1),
        }
    }

    fn base_pool(&self) -> Result<Vec<Estimator>> {
        BASE_DEPTHS
            .iter()
            .map(|&depth| {
                let mut est = Estimator::new(self.task);
                est.set_param("max_depth", &ParamValue::Int(depth))?;
                Ok(est)
            })
            .collect()
    }

    /// Fit on the training matrix and return it augmented with out-of-fold
    /// meta-features.
    pub fn fit_transform(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<Array2<f64>> {
        let n_rows = x.nrows();
        if n_rows != y.len() || n_rows == 0 {
            return Err(PipetuneError::EvaluationFailure(
                "stacking fit on empty or misaligned data".to_string(),
            ));
        }
        if n_rows < self.n_folds {
            return Err(PipetuneError::EvaluationFailure(format!(
                "stacking needs at least {} rows for {} folds, got {n_rows}",
                self.n_folds, self.n_folds
            )));
        }

        if self.task == Task::Classification {
            let mut classes: Vec<i64> = y.iter().map(|&v| v.round() as i64).collect();
            classes.sort_unstable();
            classes.dedup();
            self.classes = classes;
        }

        let labels: Option<Vec<i64>> = match self.task {
            Task::Classification => Some(y.iter().map(|&v| v.round() as i64).collect()),
            Task::Regression => None,
        };
        let strategy = match self.task {
            Task::Classification => CvStrategy::StratifiedKFold { n_splits: self.n_folds },
            Task::Regression => CvStrategy::KFold { n_splits: self.n_folds },
        };
        let splitter = CrossValidator::new(strategy, self.random_state);
        let splits = splitter.split(n_rows, labels.as_deref())?;

        let width = self.meta_width();
        let pool = self.base_pool()?;
        let mut meta = Array2::<f64>::zeros((n_rows, pool.len() * width));

        for (m, template) in pool.iter().enumerate() {
            for split in &splits {
                let x_train = x.select(Axis(0), &split.train_indices);
                let y_train: Vec<f64> = split.train_indices.iter().map(|&i| y[i]).collect();
                let x_test = x.select(Axis(0), &split.test_indices);

                let mut model = template.clone();
                model.fit(&x_train, &y_train)?;
                let pred = model.predict(&x_test)?;

                for (local, &row) in split.test_indices.iter().enumerate() {
                    let features = self.meta_row(&pred, local)?;
                    for (k, &v) in features.iter().enumerate() {
                        meta[[row, m * width + k]] = v;
                    }
                }
            }
        }

        // refit the pool on everything for transform-time predictions
        self.fitted_models = pool;
        for model in &mut self.fitted_models {
            model.fit(x, y)?;
        }
        self.is_fitted = true;

        Ok(self.assemble(x, &meta))
    }

    /// Augment an unseen matrix with meta-features from the refitted pool.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(PipetuneError::EvaluationFailure(
                "stacking layer is not fitted".to_string(),
            ));
        }

        let width = self.meta_width();
        let mut meta = Array2::<f64>::zeros((x.nrows(), self.fitted_models.len() * width));

        for (m, model) in self.fitted_models.iter().enumerate() {
            let pred = model.predict(x)?;
            for row in 0..x.nrows() {
                let features = self.meta_row(&pred, row)?;
                for (k, &v) in features.iter().enumerate() {
                    meta[[row, m * width + k]] = v;
                }
            }
        }

        Ok(self.assemble(x, &meta))
    }

    /// Meta-feature vector for one predicted row, aligned to the layer's
    /// global class order.
    fn meta_row(&self, pred: &Prediction, row: usize) -> Result<Vec<f64>> {
        match self.task {
            Task::Regression => Ok(vec![pred.values[row]]),
            Task::Classification => {
                let proba = pred.proba.as_ref().ok_or_else(|| {
                    PipetuneError::EvaluationFailure(
                        "base learner produced no class probabilities".to_string(),
                    )
                })?;
                let width = self.meta_width();
                let mut features = vec![0.0; width];
                for (k, &class) in self.classes.iter().take(width).enumerate() {
                    if let Some(pos) = pred.classes.iter().position(|&c| c == class) {
                        features[k] = proba[row][pos];
                    }
                }
                Ok(features)
            }
        }
    }

    fn assemble(&self, x: &Array2<f64>, meta: &Array2<f64>) -> Array2<f64> {
        if self.copy {
            ndarray::concatenate(Axis(1), &[x.view(), meta.view()])
                .unwrap_or_else(|_| meta.clone())
        } else {
            meta.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn classification_data() -> (Array2<f64>, Vec<f64>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..10 {
            rows.push([i as f64 * 0.1, 0.5 - i as f64 * 0.05]);
            y.push(0.0);
            rows.push([5.0 + i as f64 * 0.1, 5.5 - i as f64 * 0.05]);
            y.push(1.0);
        }
        (arr2(&rows), y)
    }

    #[test]
    fn test_copy_appends_meta_columns() {
        let (x, y) = classification_data();
        let mut layer = StackingLayer::new(Task::Classification);
        layer.set_param("n_folds", &ParamValue::Int(4)).unwrap();

        let out = layer.fit_transform(&x, &y).unwrap();
        // 2 input columns + 2 base learners * (2 classes - 1)
        assert_eq!(out.dim(), (x.nrows(), 4));
        assert_eq!(out[[0, 0]], x[[0, 0]]);
    }

    #[test]
    fn test_no_copy_keeps_only_meta() {
        let (x, y) = classification_data();
        let mut layer = StackingLayer::new(Task::Classification);
        layer.set_param("copy", &ParamValue::Bool(false)).unwrap();
        layer.set_param("n_folds", &ParamValue::Int(4)).unwrap();

        let out = layer.fit_transform(&x, &y).unwrap();
        assert_eq!(out.dim(), (x.nrows(), 2));
        // meta columns are class-0 probabilities
        for v in out.iter() {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_regression_meta_width() {
        let x = arr2(&[
            [1.0],
            [2.0],
            [3.0],
            [4.0],
            [5.0],
            [6.0],
            [7.0],
            [8.0],
        ]);
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let mut layer = StackingLayer::new(Task::Regression);
        layer.set_param("n_folds", &ParamValue::Int(2)).unwrap();

        let out = layer.fit_transform(&x, &y).unwrap();
        assert_eq!(out.dim(), (8, 3));
    }

    #[test]
    fn test_transform_matches_fit_width() {
        let (x, y) = classification_data();
        let mut layer = StackingLayer::new(Task::Classification);
        layer.set_param("n_folds", &ParamValue::Int(4)).unwrap();
        let fitted = layer.fit_transform(&x, &y).unwrap();

        let out = layer.transform(&x).unwrap();
        assert_eq!(out.dim(), fitted.dim());
    }

    #[test]
    fn test_param_validation() {
        let mut layer = StackingLayer::new(Task::Classification);
        assert!(layer.set_param("n_folds", &ParamValue::Int(1)).is_err());
        assert!(layer.set_param("copy", &ParamValue::Str("yes".into())).is_err());
        assert!(layer.set_param("depth", &ParamValue::Int(3)).is_err());
    }

    #[test]
    fn test_too_few_rows_fails() {
        let x = arr2(&[[1.0], [2.0], [3.0]]);
        let y = vec![0.0, 1.0, 0.0];
        let mut layer = StackingLayer::new(Task::Classification);
        layer.set_param("n_folds", &ParamValue::Int(5)).unwrap();
        assert!(layer.fit_transform(&x, &y).is_err());
    }
}
