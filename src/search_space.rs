//! Declarative search-space description and its sampler-ready form
//!
//! Each key of a [`SearchSpaceSpec`] declares a search strategy and an
//! ordered list of candidate values. `build` translates the description
//! into per-key dimensions the sampler draws from: a continuous interval
//! for `uniform`, an index range for `choice`. The `values` ordering is a
//! contract: the optimiser translates sampled choice indices back through
//! the same list.

use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-key search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Discrete sample drawn by index from `values` (the default)
    Choice,
    /// Continuous sample between the sorted extremes of `values`
    Uniform,
}

/// One declared search dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceEntry {
    /// Defaults to `choice` when unspecified
    #[serde(default)]
    pub strategy: Option<SearchStrategy>,
    pub values: Vec<ParamValue>,
}

impl SpaceEntry {
    /// A `choice` entry over the given values.
    pub fn choice(values: Vec<ParamValue>) -> Self {
        Self {
            strategy: Some(SearchStrategy::Choice),
            values,
        }
    }

    /// A `uniform` entry between the extremes of the given numeric values.
    pub fn uniform(values: Vec<ParamValue>) -> Self {
        Self {
            strategy: Some(SearchStrategy::Uniform),
            values,
        }
    }

    /// Effective strategy, applying the default.
    pub fn effective_strategy(&self) -> SearchStrategy {
        self.strategy.unwrap_or(SearchStrategy::Choice)
    }
}

/// Declarative search space keyed by `"<stage>__<param>"`
pub type SearchSpaceSpec = BTreeMap<String, SpaceEntry>;

/// One sampler-ready dimension
#[derive(Debug, Clone, PartialEq)]
pub enum Dimension {
    Uniform { low: f64, high: f64 },
    Choice { cardinality: usize },
}

/// Sampler-ready space: every key is sampled independently.
#[derive(Debug, Clone, Default)]
pub struct SamplerSpace {
    pub dims: BTreeMap<String, Dimension>,
}

impl SamplerSpace {
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }
}

/// Translate a declarative space into its sampler-ready form.
pub fn build(spec: &SearchSpaceSpec) -> Result<SamplerSpace> {
    let mut dims = BTreeMap::new();

    for (key, entry) in spec {
        if entry.values.is_empty() {
            return Err(PipetuneError::InvalidSearchSpace(format!(
                "you must give values for hyper parameter '{key}'"
            )));
        }

        let dim = match entry.effective_strategy() {
            SearchStrategy::Choice => Dimension::Choice {
                cardinality: entry.values.len(),
            },
            SearchStrategy::Uniform => {
                let mut numeric = Vec::with_capacity(entry.values.len());
                for value in &entry.values {
                    let v = value.as_float().ok_or_else(|| {
                        PipetuneError::InvalidSearchSpace(format!(
                            "uniform strategy for '{key}' requires numeric values, got {value}"
                        ))
                    })?;
                    numeric.push(v);
                }
                numeric.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let low = numeric[0];
                let high = numeric[numeric.len() - 1];
                if !(low < high) {
                    return Err(PipetuneError::InvalidSearchSpace(format!(
                        "uniform strategy for '{key}' requires a non-degenerate interval"
                    )));
                }
                Dimension::Uniform { low, high }
            }
        };

        dims.insert(key.clone(), dim);
    }

    Ok(SamplerSpace { dims })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_is_default_strategy() {
        let mut spec = SearchSpaceSpec::new();
        spec.insert(
            "est__max_depth".into(),
            SpaceEntry {
                strategy: None,
                values: vec![ParamValue::Int(3), ParamValue::Int(5), ParamValue::Int(7)],
            },
        );

        let space = build(&spec).unwrap();
        assert_eq!(
            space.dims["est__max_depth"],
            Dimension::Choice { cardinality: 3 }
        );
    }

    #[test]
    fn test_uniform_sorts_extremes() {
        let mut spec = SearchSpaceSpec::new();
        spec.insert(
            "est__learning_rate".into(),
            SpaceEntry::uniform(vec![ParamValue::Float(0.5), ParamValue::Float(0.01)]),
        );

        let space = build(&spec).unwrap();
        assert_eq!(
            space.dims["est__learning_rate"],
            Dimension::Uniform { low: 0.01, high: 0.5 }
        );
    }

    #[test]
    fn test_missing_values_rejected() {
        let mut spec = SearchSpaceSpec::new();
        spec.insert("est__max_depth".into(), SpaceEntry::choice(vec![]));
        assert!(matches!(
            build(&spec),
            Err(PipetuneError::InvalidSearchSpace(_))
        ));
    }

    #[test]
    fn test_uniform_requires_numeric_values() {
        let mut spec = SearchSpaceSpec::new();
        spec.insert(
            "ce__strategy".into(),
            SpaceEntry::uniform(vec![
                ParamValue::Str("label_encoding".into()),
                ParamValue::Str("entity_embedding".into()),
            ]),
        );
        assert!(matches!(
            build(&spec),
            Err(PipetuneError::InvalidSearchSpace(_))
        ));
    }

    #[test]
    fn test_unknown_strategy_rejected_at_deserialization() {
        let json = r#"{"strategy": "gaussian", "values": [1, 2]}"#;
        assert!(serde_json::from_str::<SpaceEntry>(json).is_err());

        let json = r#"{"strategy": "uniform", "values": [1, 2]}"#;
        let entry: SpaceEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.effective_strategy(), SearchStrategy::Uniform);
    }
}
