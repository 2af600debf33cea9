//! Scorer resolution and metric computation
//!
//! A `ResolvedScorer` is built once per evaluation and never mutated. All
//! metrics follow the higher-is-better convention: loss-like metrics
//! (log loss, MSE, MAE, median AE) are negated.

use crate::error::{PipetuneError, Result};
use crate::task::Task;
use tracing::warn;

const CLASSIFICATION_SCORERS: &[&str] = &[
    "accuracy",
    "roc_auc",
    "f1",
    "log_loss",
    "precision",
    "recall",
];

const REGRESSION_SCORERS: &[&str] = &[
    "mean_absolute_error",
    "mean_squared_error",
    "median_absolute_error",
    "r2",
];

/// Scoring function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Accuracy,
    Precision,
    Recall,
    F1,
    LogLoss,
    /// Scored against a one-hot expansion of the target with probability
    /// predictions, one-vs-rest averaged over classes.
    RocAuc,
    MeanAbsoluteError,
    MeanSquaredError,
    MedianAbsoluteError,
    R2,
}

impl Metric {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "accuracy" => Some(Metric::Accuracy),
            "precision" => Some(Metric::Precision),
            "recall" => Some(Metric::Recall),
            "f1" => Some(Metric::F1),
            "log_loss" => Some(Metric::LogLoss),
            "roc_auc" => Some(Metric::RocAuc),
            "mean_absolute_error" => Some(Metric::MeanAbsoluteError),
            "mean_squared_error" => Some(Metric::MeanSquaredError),
            "median_absolute_error" => Some(Metric::MedianAbsoluteError),
            "r2" => Some(Metric::R2),
            _ => None,
        }
    }
}

/// Per-call scorer: a display name for reporting plus the scoring function.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScorer {
    pub display_name: String,
    pub metric: Metric,
}

impl ResolvedScorer {
    /// Resolve a requested scorer name against the task.
    ///
    /// `None` yields the task default; a recognized name for the task passes
    /// through; an unrecognized or cross-task name degrades to the task
    /// default with a warning.
    pub fn resolve(requested: Option<&str>, task: Task, task_default: &str) -> Self {
        let valid: &[&str] = match task {
            Task::Classification => CLASSIFICATION_SCORERS,
            Task::Regression => REGRESSION_SCORERS,
        };

        let name = match requested {
            None => task_default,
            Some(name) if valid.contains(&name) => name,
            Some(name) => {
                warn!("invalid scoring metric '{name}'; {task_default} is used instead");
                task_default
            }
        };

        Self {
            display_name: name.to_string(),
            metric: Metric::from_name(name).unwrap_or_else(|| match task {
                Task::Classification => Metric::LogLoss,
                Task::Regression => Metric::MeanSquaredError,
            }),
        }
    }

    /// Score predictions against the true target.
    pub fn score(&self, y_true: &[f64], pred: &Prediction) -> Result<f64> {
        match self.metric {
            Metric::Accuracy => Ok(accuracy(y_true, &pred.values)),
            Metric::Precision => Ok(macro_precision_recall_f1(y_true, &pred.values).0),
            Metric::Recall => Ok(macro_precision_recall_f1(y_true, &pred.values).1),
            Metric::F1 => Ok(macro_precision_recall_f1(y_true, &pred.values).2),
            Metric::LogLoss => log_loss(y_true, pred).map(|loss| -loss),
            Metric::RocAuc => roc_auc_ovr(y_true, pred),
            Metric::MeanAbsoluteError => Ok(-mean_absolute_error(y_true, &pred.values)),
            Metric::MeanSquaredError => Ok(-mean_squared_error(y_true, &pred.values)),
            Metric::MedianAbsoluteError => Ok(-median_absolute_error(y_true, &pred.values)),
            Metric::R2 => Ok(r2(y_true, &pred.values)),
        }
    }
}

/// Estimator output for one fold
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Predicted labels (classification) or values (regression)
    pub values: Vec<f64>,
    /// Per-row class probabilities, columns ordered by `classes`
    pub proba: Option<Vec<Vec<f64>>>,
    /// Sorted class labels the probability columns refer to
    pub classes: Vec<i64>,
}

impl Prediction {
    /// Regression prediction without probabilities.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            values,
            proba: None,
            classes: Vec::new(),
        }
    }

    fn proba(&self) -> Result<&Vec<Vec<f64>>> {
        self.proba.as_ref().ok_or_else(|| {
            PipetuneError::EvaluationFailure(
                "scorer requires probability predictions".to_string(),
            )
        })
    }

    fn class_index(&self, label: f64) -> Result<usize> {
        let label = label.round() as i64;
        self.classes.iter().position(|&c| c == label).ok_or_else(|| {
            PipetuneError::EvaluationFailure(format!(
                "class {label} absent from fitted estimator"
            ))
        })
    }
}

fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| (**t - **p).abs() < 0.5)
        .count();
    correct as f64 / y_true.len().max(1) as f64
}

/// Macro-averaged precision, recall and F1 over the classes present in the
/// true target.
fn macro_precision_recall_f1(y_true: &[f64], y_pred: &[f64]) -> (f64, f64, f64) {
    let mut classes: Vec<i64> = y_true.iter().map(|&v| v.round() as i64).collect();
    classes.sort_unstable();
    classes.dedup();

    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut f1_sum = 0.0;

    for &class in &classes {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            let t_is = t.round() as i64 == class;
            let p_is = p.round() as i64 == class;
            match (t_is, p_is) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }
        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };
        let recall = if tp + fn_ > 0 {
            tp as f64 / (tp + fn_) as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        precision_sum += precision;
        recall_sum += recall;
        f1_sum += f1;
    }

    let n = classes.len().max(1) as f64;
    (precision_sum / n, recall_sum / n, f1_sum / n)
}

fn log_loss(y_true: &[f64], pred: &Prediction) -> Result<f64> {
    let proba = pred.proba()?;
    let mut total = 0.0;
    for (row, &label) in proba.iter().zip(y_true) {
        let idx = pred.class_index(label)?;
        let p = row[idx].clamp(1e-15, 1.0 - 1e-15);
        total -= p.ln();
    }
    Ok(total / y_true.len().max(1) as f64)
}

/// One-vs-rest ROC AUC averaged over classes with both positive and
/// negative samples, equivalent to scoring probability predictions against
/// a one-hot expansion of the target.
fn roc_auc_ovr(y_true: &[f64], pred: &Prediction) -> Result<f64> {
    let proba = pred.proba()?;
    let mut auc_sum = 0.0;
    let mut n_valid = 0usize;

    for (col, &class) in pred.classes.iter().enumerate() {
        let scores: Vec<f64> = proba.iter().map(|row| row[col]).collect();
        let positives: Vec<bool> = y_true.iter().map(|&t| t.round() as i64 == class).collect();
        let n_pos = positives.iter().filter(|&&p| p).count();
        let n_neg = positives.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            continue;
        }
        auc_sum += rank_auc(&scores, &positives, n_pos, n_neg);
        n_valid += 1;
    }

    if n_valid == 0 {
        return Err(PipetuneError::EvaluationFailure(
            "roc_auc undefined: every class is single-valued".to_string(),
        ));
    }
    Ok(auc_sum / n_valid as f64)
}

/// Mann-Whitney AUC from average ranks, ties shared.
fn rank_auc(scores: &[f64], positives: &[bool], n_pos: usize, n_neg: usize) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum: f64 = positives
        .iter()
        .zip(&ranks)
        .filter(|(&p, _)| p)
        .map(|(_, &r)| r)
        .sum();
    (rank_sum - n_pos as f64 * (n_pos as f64 + 1.0) / 2.0) / (n_pos as f64 * n_neg as f64)
}

fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / y_true.len().max(1) as f64
}

fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / y_true.len().max(1) as f64
}

fn median_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let mut errors: Vec<f64> = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).collect();
    if errors.is_empty() {
        return 0.0;
    }
    errors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = errors.len() / 2;
    if errors.len() % 2 == 0 {
        (errors[mid - 1] + errors[mid]) / 2.0
    } else {
        errors[mid]
    }
}

fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let n = y_true.len().max(1) as f64;
    let mean = y_true.iter().sum::<f64>() / n;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean) * (t - mean)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proba_pred(values: Vec<f64>, proba: Vec<Vec<f64>>, classes: Vec<i64>) -> Prediction {
        Prediction {
            values,
            proba: Some(proba),
            classes,
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let scorer = ResolvedScorer::resolve(None, Task::Classification, "log_loss");
        assert_eq!(scorer.display_name, "log_loss");
        assert_eq!(scorer.metric, Metric::LogLoss);

        let scorer = ResolvedScorer::resolve(None, Task::Regression, "mean_squared_error");
        assert_eq!(scorer.metric, Metric::MeanSquaredError);
    }

    #[test]
    fn test_resolve_unknown_degrades_to_default() {
        let scorer = ResolvedScorer::resolve(Some("nonsense"), Task::Classification, "log_loss");
        assert_eq!(scorer.display_name, "log_loss");

        // cross-task name degrades too
        let scorer = ResolvedScorer::resolve(Some("accuracy"), Task::Regression, "mean_squared_error");
        assert_eq!(scorer.display_name, "mean_squared_error");
    }

    #[test]
    fn test_roc_auc_keeps_display_name() {
        let scorer = ResolvedScorer::resolve(Some("roc_auc"), Task::Classification, "log_loss");
        assert_eq!(scorer.display_name, "roc_auc");
        assert_eq!(scorer.metric, Metric::RocAuc);
    }

    #[test]
    fn test_accuracy() {
        let pred = Prediction {
            values: vec![0.0, 1.0, 1.0, 0.0],
            proba: None,
            classes: vec![0, 1],
        };
        let scorer = ResolvedScorer::resolve(Some("accuracy"), Task::Classification, "log_loss");
        let score = scorer.score(&[0.0, 1.0, 0.0, 0.0], &pred).unwrap();
        assert!((score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_is_negated() {
        let pred = proba_pred(
            vec![0.0, 1.0],
            vec![vec![0.9, 0.1], vec![0.2, 0.8]],
            vec![0, 1],
        );
        let scorer = ResolvedScorer::resolve(None, Task::Classification, "log_loss");
        let score = scorer.score(&[0.0, 1.0], &pred).unwrap();
        let expected = -(-(0.9f64.ln()) - 0.8f64.ln()) / 2.0;
        assert!((score - expected).abs() < 1e-12);
        assert!(score < 0.0);
    }

    #[test]
    fn test_perfect_roc_auc() {
        let pred = proba_pred(
            vec![0.0, 0.0, 1.0, 1.0],
            vec![
                vec![0.9, 0.1],
                vec![0.8, 0.2],
                vec![0.3, 0.7],
                vec![0.1, 0.9],
            ],
            vec![0, 1],
        );
        let scorer = ResolvedScorer::resolve(Some("roc_auc"), Task::Classification, "log_loss");
        let score = scorer.score(&[0.0, 0.0, 1.0, 1.0], &pred).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mse_negated_and_r2() {
        let pred = Prediction::from_values(vec![1.0, 2.0, 3.0]);
        let scorer = ResolvedScorer::resolve(None, Task::Regression, "mean_squared_error");
        let score = scorer.score(&[1.0, 2.0, 4.0], &pred).unwrap();
        assert!((score + 1.0 / 3.0).abs() < 1e-12);

        let scorer = ResolvedScorer::resolve(Some("r2"), Task::Regression, "mean_squared_error");
        let score = scorer.score(&[1.0, 2.0, 3.0], &pred).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_requires_proba() {
        let pred = Prediction::from_values(vec![0.0, 1.0]);
        let scorer = ResolvedScorer::resolve(None, Task::Classification, "log_loss");
        assert!(matches!(
            scorer.score(&[0.0, 1.0], &pred),
            Err(PipetuneError::EvaluationFailure(_))
        ));
    }
}
