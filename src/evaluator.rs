//! Cross-validated pipeline evaluation
//!
//! One evaluation assembles a pipeline from a candidate, runs it through the
//! task's cross-validation splitter and reports per-fold scores. A pipeline
//! that cannot be assembled is a caller error and propagates; a pipeline
//! that fails while fitting or scoring is recorded as a failed evaluation so
//! the optimisation loop can move on.

use crate::dataset::DatasetBundle;
use crate::error::{PipetuneError, Result};
use crate::namespace::CandidateParams;
use crate::pipeline::{Pipeline, TransformCache};
use crate::scoring::ResolvedScorer;
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Shared configuration of the evaluator and the optimisation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimiserConfig {
    /// Scorer name; `None` means the task default
    pub scoring: Option<String>,
    /// Cross-validation fold count
    pub n_folds: usize,
    /// Seed for splitting and sampling
    pub random_state: u64,
    /// Directory backing the transform cache
    pub cache_dir: PathBuf,
    /// Log pipeline composition and per-fold scores
    pub verbose: bool,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            scoring: None,
            n_folds: 2,
            random_state: 1,
            cache_dir: PathBuf::from("save"),
            verbose: true,
        }
    }
}

impl OptimiserConfig {
    pub fn with_scoring(mut self, scoring: impl Into<String>) -> Self {
        self.scoring = Some(scoring.into());
        self
    }

    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_random_state(mut self, random_state: u64) -> Self {
        self.random_state = random_state;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(PipetuneError::InvalidInput(format!(
                "n_folds must be at least 2, got {}",
                self.n_folds
            )));
        }
        Ok(())
    }
}

/// Outcome of one cross-validated evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Per-fold scores, higher is better
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub elapsed_secs: f64,
    /// The evaluation ran but the pipeline failed to fit or score
    pub failed: bool,
    /// Display name of the scorer that produced the scores
    pub scorer: String,
}

/// Evaluates candidates against a dataset.
#[derive(Debug, Clone)]
pub struct PipelineEvaluator {
    config: OptimiserConfig,
}

impl PipelineEvaluator {
    pub fn new(config: OptimiserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimiserConfig {
        &self.config
    }

    /// Cross-validate one candidate.
    ///
    /// `None` evaluates the default pipeline. Input and candidate errors
    /// propagate; a pipeline that breaks during fitting or scoring yields a
    /// result with `failed` set and sentinel scores.
    pub fn evaluate(
        &self,
        params: Option<&CandidateParams>,
        data: &DatasetBundle,
    ) -> Result<EvaluationResult> {
        self.config.validate()?;

        let spec = TaskSpec::infer(&data.target, self.config.n_folds, self.config.random_state)?;
        let scorer = ResolvedScorer::resolve(
            self.config.scoring.as_deref(),
            spec.task,
            spec.default_scoring,
        );

        let full_table = data.feature_table()?;
        let retained = spec.retained_rows(full_table.n_rows);
        if retained.len() < self.config.n_folds {
            return Err(PipetuneError::InvalidInput(format!(
                "only {} rows remain after dropping deficient classes, \
                 not enough for {} folds",
                retained.len(),
                self.config.n_folds
            )));
        }
        if retained.len() < full_table.n_rows && self.config.verbose {
            info!(
                dropped = full_table.n_rows - retained.len(),
                "dropping rows of classes with fewer samples than folds"
            );
        }

        let table = full_table.subset(&retained);
        let y: Vec<f64> = retained.iter().map(|&i| spec.y[i]).collect();
        let labels: Option<Vec<i64>> = spec
            .labels
            .as_ref()
            .map(|labels| retained.iter().map(|&i| labels[i]).collect());

        let pipeline = Pipeline::assemble(spec.task, params)?;
        if self.config.verbose {
            for line in pipeline.describe() {
                info!("{line}");
            }
        }

        let cache = if pipeline.needs_caching() {
            let cache = TransformCache::new(&self.config.cache_dir)?;
            if self.config.verbose {
                info!(
                    dir = %cache.dir().display(),
                    "fitted transformers accumulate in the cache directory; \
                     delete it to reclaim space"
                );
            }
            Some(cache)
        } else {
            None
        };

        let splits = spec.splitter.split(table.n_rows, labels.as_deref())?;
        let n_splits = splits.len();

        let start = Instant::now();
        let outcome = (|| -> Result<Vec<f64>> {
            let mut fold_scores = Vec::with_capacity(n_splits);
            for split in &splits {
                let train = table.subset(&split.train_indices);
                let y_train: Vec<f64> = split.train_indices.iter().map(|&i| y[i]).collect();
                let test = table.subset(&split.test_indices);
                let y_test: Vec<f64> = split.test_indices.iter().map(|&i| y[i]).collect();

                let mut fold_pipeline = pipeline.clone();
                fold_pipeline.fit(&train, &y_train, cache.as_ref())?;
                let pred = fold_pipeline.predict(&test)?;
                let score = scorer.score(&y_test, &pred)?;
                if !score.is_finite() {
                    return Err(PipetuneError::EvaluationFailure(format!(
                        "fold {} produced a non-finite {} score",
                        split.fold_idx, scorer.display_name
                    )));
                }
                fold_scores.push(score);
            }
            Ok(fold_scores)
        })();
        let elapsed_secs = start.elapsed().as_secs_f64();

        let (fold_scores, failed) = match outcome {
            Ok(scores) => (scores, false),
            Err(PipetuneError::EvaluationFailure(msg)) | Err(PipetuneError::DataError(msg)) => {
                warn!("algorithm misbehaving, trying next configuration: {msg}");
                (vec![f64::NEG_INFINITY; n_splits], true)
            }
            Err(other) => return Err(other),
        };

        let mean_score = mean(&fold_scores);
        let std_score = if failed { 0.0 } else { std(&fold_scores, mean_score) };

        if self.config.verbose {
            info!(
                scorer = %scorer.display_name,
                mean = mean_score,
                std = std_score,
                elapsed_secs,
                "cross-validation done"
            );
        }

        Ok(EvaluationResult {
            fold_scores,
            mean_score,
            std_score,
            elapsed_secs,
            failed,
            scorer: scorer.display_name,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

/// Population standard deviation.
fn std(values: &[f64], mean: f64) -> f64 {
    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len().max(1) as f64)
        .sqrt()
}
