//! Categorical encoder: turns a mixed-type table into a numeric matrix
//!
//! Numeric columns pass through unchanged; categorical columns are expanded
//! according to the configured strategy. The output is the dense matrix the
//! downstream stages (feature selection, stacking, estimator) consume.

use crate::dataset::{FeatureColumn, Table};
use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use ndarray::Array2;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How categorical columns become numeric ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
    /// One column per categorical feature, categories mapped to sorted rank
    LabelEncoding,
    /// One indicator column per seen category
    Dummification,
    /// Categories projected onto a small random basis
    RandomProjection,
    /// Dense low-dimensional representation per category; expensive to fit,
    /// so pipelines using it are cached
    EntityEmbedding,
}

impl EncodingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LabelEncoding => "label_encoding",
            Self::Dummification => "dummification",
            Self::RandomProjection => "random_projection",
            Self::EntityEmbedding => "entity_embedding",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "label_encoding" => Some(Self::LabelEncoding),
            "dummification" => Some(Self::Dummification),
            "random_projection" => Some(Self::RandomProjection),
            "entity_embedding" => Some(Self::EntityEmbedding),
            _ => None,
        }
    }
}

/// Fitted per-column encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
enum ColumnEncoding {
    /// Numeric column, forwarded as-is
    Passthrough,
    /// Categorical column: each seen category maps to a fixed-width vector;
    /// unseen categories map to zeros
    Mapped {
        vectors: BTreeMap<String, Vec<f64>>,
        width: usize,
    },
}

impl ColumnEncoding {
    fn width(&self) -> usize {
        match self {
            Self::Passthrough => 1,
            Self::Mapped { width, .. } => *width,
        }
    }
}

/// Encodes categorical features into numeric columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatEncoder {
    strategy: EncodingStrategy,
    encodings: Vec<ColumnEncoding>,
    is_fitted: bool,
}

impl Default for CatEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CatEncoder {
    pub fn new() -> Self {
        Self {
            strategy: EncodingStrategy::LabelEncoding,
            encodings: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn strategy(&self) -> EncodingStrategy {
        self.strategy
    }

    pub fn describe(&self) -> String {
        format!("strategy: {}", self.strategy.as_str())
    }

    pub fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "strategy" => {
                let s = value.as_str().ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for parameter 'ce__strategy'"
                    ))
                })?;
                self.strategy = EncodingStrategy::parse(s).ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "unknown encoding strategy '{s}'"
                    ))
                })?;
            }
            _ => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "categorical encoder has no parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, table: &Table) -> Result<()> {
        self.encodings = table
            .columns
            .iter()
            .enumerate()
            .map(|(col_idx, col)| match col {
                FeatureColumn::Numeric(_) => ColumnEncoding::Passthrough,
                FeatureColumn::Categorical(values) => {
                    let categories: BTreeSet<&str> =
                        values.iter().flatten().map(String::as_str).collect();
                    self.encode_categories(&categories, col_idx)
                }
            })
            .collect();
        self.is_fitted = true;
        Ok(())
    }

    pub fn transform(&self, table: &Table) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(PipetuneError::EvaluationFailure(
                "categorical encoder is not fitted".to_string(),
            ));
        }
        if self.encodings.len() != table.n_cols() {
            return Err(PipetuneError::EvaluationFailure(format!(
                "categorical encoder fitted on {} columns, got {}",
                self.encodings.len(),
                table.n_cols()
            )));
        }

        let total_width: usize = self.encodings.iter().map(ColumnEncoding::width).sum();
        let mut data = Vec::with_capacity(table.n_rows * total_width);

        for row in 0..table.n_rows {
            for (col, encoding) in table.columns.iter().zip(&self.encodings) {
                match (col, encoding) {
                    (FeatureColumn::Numeric(values), ColumnEncoding::Passthrough) => {
                        data.push(values[row].unwrap_or(f64::NAN));
                    }
                    (
                        FeatureColumn::Categorical(values),
                        ColumnEncoding::Mapped { vectors, width },
                    ) => match values[row].as_ref().and_then(|v| vectors.get(v)) {
                        Some(vector) => data.extend_from_slice(vector),
                        None => data.extend(std::iter::repeat(0.0).take(*width)),
                    },
                    _ => {
                        return Err(PipetuneError::EvaluationFailure(
                            "column kind changed between fit and transform".to_string(),
                        ))
                    }
                }
            }
        }

        Array2::from_shape_vec((table.n_rows, total_width), data)
            .map_err(|e| PipetuneError::EvaluationFailure(e.to_string()))
    }

    pub fn fit_transform(&mut self, table: &Table) -> Result<Array2<f64>> {
        self.fit(table)?;
        self.transform(table)
    }

    fn encode_categories(&self, categories: &BTreeSet<&str>, col_idx: usize) -> ColumnEncoding {
        let n = categories.len();
        match self.strategy {
            EncodingStrategy::LabelEncoding => {
                let vectors = categories
                    .iter()
                    .enumerate()
                    .map(|(rank, cat)| (cat.to_string(), vec![rank as f64]))
                    .collect();
                ColumnEncoding::Mapped { vectors, width: 1 }
            }
            EncodingStrategy::Dummification => {
                let width = n.max(1);
                let vectors = categories
                    .iter()
                    .enumerate()
                    .map(|(rank, cat)| {
                        let mut one_hot = vec![0.0; width];
                        one_hot[rank] = 1.0;
                        (cat.to_string(), one_hot)
                    })
                    .collect();
                ColumnEncoding::Mapped { vectors, width }
            }
            EncodingStrategy::RandomProjection => {
                let width = projection_width(n);
                self.random_vectors(categories, width, col_idx)
            }
            EncodingStrategy::EntityEmbedding => {
                let width = embedding_width(n);
                self.random_vectors(categories, width, col_idx)
            }
        }
    }

    /// Dense per-category vectors drawn from a seeded generator so fitting
    /// the same column twice yields the same representation.
    fn random_vectors(
        &self,
        categories: &BTreeSet<&str>,
        width: usize,
        col_idx: usize,
    ) -> ColumnEncoding {
        let mut rng = ChaCha8Rng::seed_from_u64(0x70_69_70_65 ^ col_idx as u64);
        let vectors = categories
            .iter()
            .map(|cat| {
                let vector = (0..width).map(|_| rng.gen_range(-1.0..1.0)).collect();
                (cat.to_string(), vector)
            })
            .collect();
        ColumnEncoding::Mapped { vectors, width }
    }
}

/// Basis size for the random projection of an n-category column.
fn projection_width(n: usize) -> usize {
    ((n as f64).sqrt().ceil() as usize).clamp(1, n.max(1))
}

/// Representation size for an n-category embedding.
fn embedding_width(n: usize) -> usize {
    ((n + 1) / 2).clamp(1, 50)
}
