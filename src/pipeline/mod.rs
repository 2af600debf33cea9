//! Pipeline assembly and execution
//!
//! A candidate's flat parameter map both configures and shapes the pipeline:
//! the fixed backbone is NA encoding, categorical encoding and the final
//! estimator, while feature selection and stacking layers only exist when a
//! candidate addresses them. Stage order is fixed: `ne`, `ce`, `fs`,
//! `stck1..stckN` in ascending index order, `est`.

pub mod cache;
pub mod cat_encoder;
pub mod estimator;
pub mod feature_selector;
pub mod na_encoder;
pub mod stacking;

pub use cache::TransformCache;
pub use cat_encoder::{CatEncoder, EncodingStrategy};
pub use estimator::Estimator;
pub use feature_selector::{FeatureSelector, SelectionStrategy};
pub use na_encoder::NaEncoder;
pub use stacking::StackingLayer;

use crate::dataset::{FeatureColumn, Table};
use crate::error::{PipetuneError, Result};
use crate::namespace::{CandidateParams, ParamKey, StageActivation, StageKind};
use crate::scoring::Prediction;
use crate::task::Task;
use cache::matrix_fingerprint;
use ndarray::Array2;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A fully assembled, configurable pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    task: Task,
    ne: NaEncoder,
    ce: CatEncoder,
    fs: Option<FeatureSelector>,
    /// Stacking layers with their 1-based tag indices, ascending
    stacks: Vec<(usize, StackingLayer)>,
    est: Estimator,
}

impl Pipeline {
    /// Assemble a pipeline for a candidate and apply its parameters.
    ///
    /// `None` (or an empty map) yields the default backbone: NA encoding,
    /// label encoding and a default estimator. A malformed key or an invalid
    /// parameter value is fatal.
    pub fn assemble(task: Task, params: Option<&CandidateParams>) -> Result<Self> {
        let activation = StageActivation::from_params(params);

        let mut pipeline = Self {
            task,
            ne: NaEncoder::new(),
            ce: CatEncoder::new(),
            fs: activation.feature_selection.then(FeatureSelector::new),
            stacks: activation
                .stacking_layers
                .iter()
                .map(|&i| (i, StackingLayer::new(task)))
                .collect(),
            est: Estimator::new(task),
        };

        if let Some(params) = params {
            pipeline.apply_params(params)?;
        }
        Ok(pipeline)
    }

    /// Route each `"<tag>__<param>"` entry to its stage.
    fn apply_params(&mut self, params: &CandidateParams) -> Result<()> {
        for (key, value) in params {
            let parsed = ParamKey::parse(key)?;
            match parsed.stage {
                StageKind::NaEncoder => self.ne.set_param(&parsed.name, value)?,
                StageKind::CatEncoder => self.ce.set_param(&parsed.name, value)?,
                StageKind::Estimator => self.est.set_param(&parsed.name, value)?,
                StageKind::FeatureSelector => {
                    let fs = self.fs.as_mut().ok_or_else(|| {
                        PipetuneError::InvalidPipelineParams(format!(
                            "key '{key}' addresses an inactive feature selector"
                        ))
                    })?;
                    fs.set_param(&parsed.name, value)?;
                }
                StageKind::StackingLayer(i) => {
                    let layer = self
                        .stacks
                        .iter_mut()
                        .find(|(idx, _)| *idx == i)
                        .map(|(_, layer)| layer)
                        .ok_or_else(|| {
                            PipetuneError::InvalidPipelineParams(format!(
                                "key '{key}' addresses an inactive stacking layer"
                            ))
                        })?;
                    layer.set_param(&parsed.name, value)?;
                }
            }
        }
        Ok(())
    }

    /// Whether evaluating this pipeline warrants the on-disk fit cache:
    /// entity embeddings, non-variance feature selection, or any stacking.
    pub fn needs_caching(&self) -> bool {
        self.ce.strategy() == EncodingStrategy::EntityEmbedding
            || self
                .fs
                .as_ref()
                .is_some_and(|fs| fs.strategy() != SelectionStrategy::Variance)
            || !self.stacks.is_empty()
    }

    /// Fit every stage in order on a training table. With a cache, the
    /// transform stages reuse previous identical fits.
    pub fn fit(&mut self, table: &Table, y: &[f64], cache: Option<&TransformCache>) -> Result<()> {
        let filled = self.ne.fit_transform(table)?;

        let mut x = match cache {
            Some(cache) => {
                let fp = table_fingerprint(&filled);
                cache.fit_or_reuse("ce", &mut self.ce, fp, |ce| ce.fit_transform(&filled))?
            }
            None => self.ce.fit_transform(&filled)?,
        };

        if let Some(fs) = self.fs.as_mut() {
            x = match cache {
                Some(cache) => {
                    let fp = matrix_fingerprint(&x);
                    let input = x;
                    cache.fit_or_reuse("fs", fs, fp, |fs| fs.fit_transform(&input, y))?
                }
                None => fs.fit_transform(&x, y)?,
            };
        }

        for (idx, layer) in &mut self.stacks {
            x = match cache {
                Some(cache) => {
                    let tag = format!("stck{idx}");
                    let fp = matrix_fingerprint(&x);
                    let input = x;
                    cache.fit_or_reuse(&tag, layer, fp, |layer| layer.fit_transform(&input, y))?
                }
                None => layer.fit_transform(&x, y)?,
            };
        }

        self.est.fit(&x, y)
    }

    /// Run the fitted transform chain on unseen rows and predict.
    pub fn predict(&self, table: &Table) -> Result<Prediction> {
        let filled = self.ne.transform(table)?;
        let mut x = self.ce.transform(&filled)?;
        if let Some(fs) = &self.fs {
            x = fs.transform(&x)?;
        }
        for (_, layer) in &self.stacks {
            x = layer.transform(&x)?;
        }
        self.est.predict(&x)
    }

    /// The fitted feature matrix for a table, without predicting. Used by
    /// tests and diagnostics.
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>> {
        let filled = self.ne.transform(table)?;
        let mut x = self.ce.transform(&filled)?;
        if let Some(fs) = &self.fs {
            x = fs.transform(&x)?;
        }
        for (_, layer) in &self.stacks {
            x = layer.transform(&x)?;
        }
        Ok(x)
    }

    /// Ordered stage tags, for diagnostic output.
    pub fn stage_tags(&self) -> Vec<String> {
        let mut tags = vec!["ne".to_string(), "ce".to_string()];
        if self.fs.is_some() {
            tags.push("fs".to_string());
        }
        for (idx, _) in &self.stacks {
            tags.push(format!("stck{idx}"));
        }
        tags.push("est".to_string());
        tags
    }

    /// One line per stage describing its configuration.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!("ne: {}", self.ne.describe()),
            format!("ce: {}", self.ce.describe()),
        ];
        if let Some(fs) = &self.fs {
            lines.push(format!("fs: {}", fs.describe()));
        }
        for (idx, layer) in &self.stacks {
            lines.push(format!("stck{idx}: {}", layer.describe()));
        }
        lines.push(format!("est: {}", self.est.describe()));
        lines
    }
}

/// Fingerprint of a filled table, for cache keys.
fn table_fingerprint(table: &Table) -> u64 {
    let mut hasher = DefaultHasher::new();
    table.names.hash(&mut hasher);
    table.n_rows.hash(&mut hasher);
    for col in &table.columns {
        match col {
            FeatureColumn::Numeric(values) => {
                for v in values {
                    v.map(f64::to_bits).hash(&mut hasher);
                }
            }
            FeatureColumn::Categorical(values) => values.hash(&mut hasher),
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::ParamValue;

    fn train_table() -> (Table, Vec<f64>) {
        let mut num = Vec::new();
        let mut cat = Vec::new();
        let mut y = Vec::new();
        for i in 0..12 {
            num.push(Some(i as f64));
            cat.push(Some(if i % 2 == 0 { "even" } else { "odd" }.to_string()));
            y.push(if i < 6 { 0.0 } else { 1.0 });
        }
        let table = Table {
            names: vec!["num".to_string(), "cat".to_string()],
            columns: vec![
                FeatureColumn::Numeric(num),
                FeatureColumn::Categorical(cat),
            ],
            n_rows: 12,
        };
        (table, y)
    }

    #[test]
    fn test_default_pipeline_order() {
        let pipeline = Pipeline::assemble(Task::Classification, None).unwrap();
        assert_eq!(pipeline.stage_tags(), vec!["ne", "ce", "est"]);
        assert!(!pipeline.needs_caching());
    }

    #[test]
    fn test_optional_stages_ordered() {
        let mut params = CandidateParams::new();
        params.insert("stck2__n_folds".into(), ParamValue::Int(3));
        params.insert("stck1__copy".into(), ParamValue::Bool(true));
        params.insert("fs__strategy".into(), ParamValue::Str("variance".into()));
        params.insert("est__max_depth".into(), ParamValue::Int(4));

        let pipeline = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        assert_eq!(
            pipeline.stage_tags(),
            vec!["ne", "ce", "fs", "stck1", "stck2", "est"]
        );
    }

    #[test]
    fn test_malformed_key_is_fatal() {
        let mut params = CandidateParams::new();
        params.insert("max_depth".into(), ParamValue::Int(4));
        let err = Pipeline::assemble(Task::Classification, Some(&params)).unwrap_err();
        assert!(matches!(err, PipetuneError::InvalidPipelineParams(_)));

        let mut params = CandidateParams::new();
        params.insert("xx__foo".into(), ParamValue::Int(1));
        assert!(Pipeline::assemble(Task::Classification, Some(&params)).is_err());
    }

    #[test]
    fn test_unknown_param_name_is_fatal() {
        let mut params = CandidateParams::new();
        params.insert("est__gamma".into(), ParamValue::Float(0.1));
        assert!(Pipeline::assemble(Task::Classification, Some(&params)).is_err());
    }

    #[test]
    fn test_needs_caching_triggers() {
        let mut params = CandidateParams::new();
        params.insert("ce__strategy".into(), ParamValue::Str("entity_embedding".into()));
        let pipeline = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        assert!(pipeline.needs_caching());

        let mut params = CandidateParams::new();
        params.insert("fs__strategy".into(), ParamValue::Str("correlation".into()));
        let pipeline = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        assert!(pipeline.needs_caching());

        let mut params = CandidateParams::new();
        params.insert("fs__strategy".into(), ParamValue::Str("variance".into()));
        let pipeline = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        assert!(!pipeline.needs_caching());

        let mut params = CandidateParams::new();
        params.insert("stck1__n_folds".into(), ParamValue::Int(3));
        let pipeline = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        assert!(pipeline.needs_caching());
    }

    #[test]
    fn test_fit_predict_roundtrip() {
        let (table, y) = train_table();
        let mut pipeline = Pipeline::assemble(Task::Classification, None).unwrap();
        pipeline.fit(&table, &y, None).unwrap();

        let pred = pipeline.predict(&table).unwrap();
        assert_eq!(pred.values.len(), table.n_rows);
        assert!(pred.proba.is_some());
    }

    #[test]
    fn test_fit_with_cache_matches_uncached() {
        let (table, y) = train_table();
        let mut params = CandidateParams::new();
        params.insert("ce__strategy".into(), ParamValue::Str("entity_embedding".into()));

        let mut uncached = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
        uncached.fit(&table, &y, None).unwrap();
        let expected = uncached.transform(&table).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let cache = TransformCache::new(tmp.path()).unwrap();
        for _ in 0..2 {
            let mut cached = Pipeline::assemble(Task::Classification, Some(&params)).unwrap();
            cached.fit(&table, &y, Some(&cache)).unwrap();
            assert_eq!(cached.transform(&table).unwrap(), expected);
        }
    }
}
