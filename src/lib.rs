//! # pipetune
//!
//! Hyper-parameter optimisation for tabular machine-learning pipelines.
//!
//! A pipeline is assembled from a flat parameter map: missing-value
//! encoding, categorical encoding, optional feature selection, optional
//! stacking layers and a final estimator, each addressed by a
//! `"<stage>__<param>"` key. The optimiser cross-validates candidates drawn
//! from a declarative search space and returns the best parameter map it
//! saw.
//!
//! # Modules
//!
//! - [`dataset`] - Feature frame plus target, and the internal column table
//! - [`task`] - Task inference from the target dtype
//! - [`namespace`] - The flat `"<stage>__<param>"` key grammar
//! - [`pipeline`] - Stage implementations, assembly and the fit cache
//! - [`cv`] - Seeded k-fold and stratified k-fold splitting
//! - [`scoring`] - Scorer resolution and metric computation
//! - [`search_space`] - Declarative search-space description
//! - [`sampler`] - The sequential search algorithm contract and default
//! - [`evaluator`] - Cross-validated candidate evaluation
//! - [`optimiser`] - The optimisation loop
//!
//! ```no_run
//! use pipetune::prelude::*;
//! use polars::prelude::*;
//!
//! # fn main() -> pipetune::Result<()> {
//! let features = DataFrame::new(vec![
//!     Series::new("age".into(), &[25i64, 32, 47, 51]).into(),
//!     Series::new("city".into(), &["NYC", "LA", "NYC", "SF"]).into(),
//! ])?;
//! let target = Series::new("churn".into(), &[0i64, 1, 0, 1]);
//! let data = DatasetBundle::new(features, target)?;
//!
//! let mut space = SearchSpaceSpec::new();
//! space.insert(
//!     "est__max_depth".into(),
//!     SpaceEntry::choice(vec![ParamValue::Int(3), ParamValue::Int(5)]),
//! );
//!
//! let optimiser = PipelineOptimiser::new(OptimiserConfig::default());
//! let best = optimiser.optimise(&space, &data, 20)?;
//! let result = optimiser.evaluate(Some(&best), &data)?;
//! println!("{} = {}", result.scorer, result.mean_score);
//! # Ok(())
//! # }
//! ```

pub mod cv;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod namespace;
pub mod optimiser;
pub mod pipeline;
pub mod sampler;
pub mod scoring;
pub mod search_space;
pub mod task;

pub use error::{PipetuneError, Result};

/// Common imports for driving an optimisation.
pub mod prelude {
    pub use crate::dataset::DatasetBundle;
    pub use crate::error::{PipetuneError, Result};
    pub use crate::evaluator::{EvaluationResult, OptimiserConfig, PipelineEvaluator};
    pub use crate::namespace::{CandidateParams, ParamValue};
    pub use crate::optimiser::PipelineOptimiser;
    pub use crate::pipeline::Pipeline;
    pub use crate::sampler::{AdaptiveSampler, SearchAlgorithm};
    pub use crate::search_space::{SearchSpaceSpec, SearchStrategy, SpaceEntry};
    pub use crate::task::Task;
}
