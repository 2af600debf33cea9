//! Task inference from the target vector
//!
//! An integer-coded target means classification, a continuous target means
//! regression; anything else is an invalid input. The inferred task fixes
//! the splitter (stratified vs plain k-fold), the default scorer, and the
//! class-deficiency filter.

use crate::cv::{CrossValidator, CvStrategy};
use crate::error::{PipetuneError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The supervised learning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Classification,
    Regression,
}

/// Everything evaluation needs that follows from the target alone
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task: Task,
    /// Seeded splitter: stratified for classification, plain for regression
    pub splitter: CrossValidator,
    /// Default scorer name for this task
    pub default_scoring: &'static str,
    /// Target as floats, the form every estimator consumes
    pub y: Vec<f64>,
    /// Integer labels (classification only)
    pub labels: Option<Vec<i64>>,
    /// Rows whose class has fewer members than the fold count; they must be
    /// excluded from both features and target before splitting.
    pub rows_to_drop: Vec<usize>,
}

impl TaskSpec {
    /// Infer the task from a target vector.
    pub fn infer(target: &Series, n_folds: usize, random_state: u64) -> Result<Self> {
        match target.dtype() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => {
                let casted = target.cast(&DataType::Int64)?;
                let ca = casted
                    .i64()
                    .map_err(|e| PipetuneError::DataError(e.to_string()))?;
                let mut labels = Vec::with_capacity(ca.len());
                for value in ca.into_iter() {
                    match value {
                        Some(v) => labels.push(v),
                        None => {
                            return Err(PipetuneError::InvalidInput(
                                "target contains missing values".to_string(),
                            ))
                        }
                    }
                }

                let rows_to_drop = deficient_rows(&labels, n_folds);
                let y = labels.iter().map(|&v| v as f64).collect();

                Ok(Self {
                    task: Task::Classification,
                    splitter: CrossValidator::new(
                        CvStrategy::StratifiedKFold { n_splits: n_folds },
                        random_state,
                    ),
                    default_scoring: "log_loss",
                    y,
                    labels: Some(labels),
                    rows_to_drop,
                })
            }
            DataType::Float32 | DataType::Float64 => {
                let casted = target.cast(&DataType::Float64)?;
                let ca = casted
                    .f64()
                    .map_err(|e| PipetuneError::DataError(e.to_string()))?;
                let mut y = Vec::with_capacity(ca.len());
                for value in ca.into_iter() {
                    match value {
                        Some(v) => y.push(v),
                        None => {
                            return Err(PipetuneError::InvalidInput(
                                "target contains missing values".to_string(),
                            ))
                        }
                    }
                }

                Ok(Self {
                    task: Task::Regression,
                    splitter: CrossValidator::new(
                        CvStrategy::KFold { n_splits: n_folds },
                        random_state,
                    ),
                    default_scoring: "mean_squared_error",
                    y,
                    labels: None,
                    rows_to_drop: Vec::new(),
                })
            }
            other => Err(PipetuneError::InvalidInput(format!(
                "impossible to determine the task from target dtype {other:?}; \
                 expected integer labels or continuous values"
            ))),
        }
    }

    /// Row indices retained after dropping class-deficient rows.
    pub fn retained_rows(&self, n_rows: usize) -> Vec<usize> {
        if self.rows_to_drop.is_empty() {
            return (0..n_rows).collect();
        }
        let dropped: std::collections::BTreeSet<usize> =
            self.rows_to_drop.iter().copied().collect();
        (0..n_rows).filter(|i| !dropped.contains(i)).collect()
    }
}

/// Rows belonging to classes with fewer samples than the fold count.
fn deficient_rows(labels: &[i64], n_folds: usize) -> Vec<usize> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }

    labels
        .iter()
        .enumerate()
        .filter(|(_, label)| counts[label] < n_folds)
        .map(|(i, _)| i)
        .collect()
}
