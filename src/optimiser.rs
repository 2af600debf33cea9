//! Sequential pipeline optimisation
//!
//! The optimiser walks a declarative search space with a [`SearchAlgorithm`]:
//! each trial samples a vector, translates it into candidate parameters,
//! cross-validates the resulting pipeline and feeds the loss (the negated
//! mean score) back to the algorithm. The best vector is translated back
//! through the declared value lists before it is returned.

use crate::dataset::DatasetBundle;
use crate::error::{PipetuneError, Result};
use crate::evaluator::{EvaluationResult, OptimiserConfig, PipelineEvaluator};
use crate::namespace::{CandidateParams, ParamValue};
use crate::sampler::{AdaptiveSampler, SampledValue, SampledVector, SearchAlgorithm};
use crate::search_space::{self, SearchSpaceSpec, SearchStrategy};
use tracing::{info, warn};

/// Searches a pipeline space for the best cross-validated candidate.
#[derive(Debug, Clone)]
pub struct PipelineOptimiser {
    evaluator: PipelineEvaluator,
}

impl PipelineOptimiser {
    pub fn new(config: OptimiserConfig) -> Self {
        Self {
            evaluator: PipelineEvaluator::new(config),
        }
    }

    pub fn evaluator(&self) -> &PipelineEvaluator {
        &self.evaluator
    }

    /// Cross-validate a single candidate (or the default pipeline).
    pub fn evaluate(
        &self,
        params: Option<&CandidateParams>,
        data: &DatasetBundle,
    ) -> Result<EvaluationResult> {
        self.evaluator.evaluate(params, data)
    }

    /// Run the search with the default sampler, seeded from the config.
    pub fn optimise(
        &self,
        space: &SearchSpaceSpec,
        data: &DatasetBundle,
        budget: usize,
    ) -> Result<CandidateParams> {
        let sampler = AdaptiveSampler::new(self.evaluator.config().random_state);
        self.optimise_with(sampler, space, data, budget)
    }

    /// Run the search with a caller-supplied algorithm.
    ///
    /// Exactly `budget` candidates are evaluated. An empty space warns and
    /// returns an empty parameter map without evaluating anything.
    pub fn optimise_with<A: SearchAlgorithm>(
        &self,
        mut algorithm: A,
        space: &SearchSpaceSpec,
        data: &DatasetBundle,
        budget: usize,
    ) -> Result<CandidateParams> {
        if space.is_empty() {
            warn!("the search space is empty, the default pipeline is kept");
            return Ok(CandidateParams::new());
        }
        if budget == 0 {
            return Err(PipetuneError::InvalidInput(
                "the evaluation budget must be at least 1".to_string(),
            ));
        }

        let sampler_space = search_space::build(space)?;

        for trial in 0..budget {
            let vector = algorithm.suggest(&sampler_space);
            let params = back_translate(&vector, space)?;

            let result = self.evaluator.evaluate(Some(&params), data)?;
            let loss = -result.mean_score;

            if self.evaluator.config().verbose {
                info!(
                    trial,
                    loss,
                    failed = result.failed,
                    params = %format_params(&params),
                    "trial done"
                );
            }
            algorithm.observe(vector, loss);
        }

        let best_vector = algorithm.best().ok_or_else(|| {
            PipetuneError::InvalidInput("no completed trial to pick a best from".to_string())
        })?;
        let best = back_translate(best_vector, space)?;

        if self.evaluator.config().verbose {
            info!(params = %format_params(&best), "best hyper parameters");
        }
        Ok(best)
    }
}

/// Translate a sampled vector back into domain parameter values through the
/// declared value lists.
fn back_translate(vector: &SampledVector, space: &SearchSpaceSpec) -> Result<CandidateParams> {
    let mut params = CandidateParams::new();

    for (key, sampled) in vector {
        let entry = space.get(key).ok_or_else(|| {
            PipetuneError::InvalidSearchSpace(format!(
                "sampled key '{key}' is not part of the search space"
            ))
        })?;

        let value = match (sampled, entry.effective_strategy()) {
            (SampledValue::Index(i), SearchStrategy::Choice) => entry
                .values
                .get(*i)
                .cloned()
                .ok_or_else(|| {
                    PipetuneError::InvalidSearchSpace(format!(
                        "sampled index {i} out of range for '{key}'"
                    ))
                })?,
            (SampledValue::Continuous(v), SearchStrategy::Uniform) => ParamValue::Float(*v),
            (sampled, strategy) => {
                return Err(PipetuneError::InvalidSearchSpace(format!(
                    "sampled value {sampled:?} does not fit {strategy:?} entry '{key}'"
                )))
            }
        };
        params.insert(key.clone(), value);
    }

    Ok(params)
}

fn format_params(params: &CandidateParams) -> String {
    let parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", parts.join(", "))
}
