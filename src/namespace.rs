//! Flat parameter namespace for pipeline stages
//!
//! Candidate parameters and search-space entries are keyed by compound
//! identifiers of the form `"<stage_tag>__<param_name>"`, where the stage
//! tag is one of `ne`, `ce`, `fs`, `stck<i>` (i >= 1) or `est`.

use crate::error::{PipetuneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A concrete parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    /// Get as float (ints widen)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int (floats truncate)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Candidate parameters for a whole pipeline, keyed by `"<tag>__<name>"`.
///
/// Ordered so that stacking tags sort deterministically and diagnostic
/// output is stable.
pub type CandidateParams = BTreeMap<String, ParamValue>;

/// The stage a parameter key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    NaEncoder,
    CatEncoder,
    FeatureSelector,
    /// One stacking layer, identified by its 1-based index
    StackingLayer(usize),
    Estimator,
}

impl StageKind {
    /// The namespace tag for this stage, e.g. `stck2`
    pub fn tag(&self) -> String {
        match self {
            StageKind::NaEncoder => "ne".to_string(),
            StageKind::CatEncoder => "ce".to_string(),
            StageKind::FeatureSelector => "fs".to_string(),
            StageKind::StackingLayer(i) => format!("stck{i}"),
            StageKind::Estimator => "est".to_string(),
        }
    }
}

/// A parsed parameter key: `(stage, param_name)`
#[derive(Debug, Clone, PartialEq)]
pub struct ParamKey {
    pub stage: StageKind,
    pub name: String,
}

impl ParamKey {
    /// Parse a compound key with a total, explicit grammar.
    ///
    /// Anything that does not match the grammar is rejected with
    /// `InvalidPipelineParams`: a missing `__` separator, an empty parameter
    /// name, an unknown stage tag, or a stacking tag whose index is not a
    /// positive integer.
    pub fn parse(key: &str) -> Result<Self> {
        let (tag, name) = key.split_once("__").ok_or_else(|| {
            PipetuneError::InvalidPipelineParams(format!(
                "key '{key}' does not match '<stage>__<param>'"
            ))
        })?;

        if name.is_empty() {
            return Err(PipetuneError::InvalidPipelineParams(format!(
                "key '{key}' has an empty parameter name"
            )));
        }

        let stage = match tag {
            "ne" => StageKind::NaEncoder,
            "ce" => StageKind::CatEncoder,
            "fs" => StageKind::FeatureSelector,
            "est" => StageKind::Estimator,
            _ => {
                let idx = tag
                    .strip_prefix("stck")
                    .and_then(|s| s.parse::<usize>().ok())
                    .filter(|&i| i >= 1)
                    .ok_or_else(|| {
                        PipetuneError::InvalidPipelineParams(format!(
                            "unknown stage tag '{tag}' in key '{key}'"
                        ))
                    })?;
                StageKind::StackingLayer(idx)
            }
        };

        Ok(Self {
            stage,
            name: name.to_string(),
        })
    }
}

/// Which optional stages a candidate activates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageActivation {
    /// A feature selector is part of the pipeline
    pub feature_selection: bool,
    /// Indices of activated stacking layers, ordered and deduplicated
    pub stacking_layers: BTreeSet<usize>,
}

impl StageActivation {
    /// Scan a candidate for keys that activate optional stages.
    ///
    /// Keys that do not parse are ignored here; they surface as
    /// `InvalidPipelineParams` when the candidate is applied to the
    /// assembled pipeline.
    pub fn from_params(params: Option<&CandidateParams>) -> Self {
        let mut activation = Self::default();
        let Some(params) = params else {
            return activation;
        };

        for key in params.keys() {
            match ParamKey::parse(key) {
                Ok(ParamKey {
                    stage: StageKind::FeatureSelector,
                    ..
                }) => activation.feature_selection = true,
                Ok(ParamKey {
                    stage: StageKind::StackingLayer(i),
                    ..
                }) => {
                    activation.stacking_layers.insert(i);
                }
                _ => {}
            }
        }

        activation
    }
}
