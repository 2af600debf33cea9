//! Dataset bundle and the internal column table the pipeline stages consume

use crate::error::{PipetuneError, Result};
use polars::prelude::*;

/// A training dataset: a tabular feature frame plus a row-aligned target.
///
/// The target dtype drives task inference: integer-coded labels mean
/// classification, continuous values mean regression.
#[derive(Debug, Clone)]
pub struct DatasetBundle {
    pub features: DataFrame,
    pub target: Series,
}

impl DatasetBundle {
    /// Bundle features and target, validating row alignment.
    pub fn new(features: DataFrame, target: Series) -> Result<Self> {
        if features.height() == 0 || features.width() == 0 {
            return Err(PipetuneError::InvalidInput(
                "features frame is empty".to_string(),
            ));
        }
        if features.height() != target.len() {
            return Err(PipetuneError::InvalidInput(format!(
                "features have {} rows but target has {}",
                features.height(),
                target.len()
            )));
        }
        Ok(Self { features, target })
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.features.height()
    }

    /// Extract the feature frame into the owned column table the pipeline
    /// operates on. Unsupported column dtypes are an input error.
    pub fn feature_table(&self) -> Result<Table> {
        Table::from_dataframe(&self.features)
    }
}

/// One extracted feature column
#[derive(Debug, Clone)]
pub enum FeatureColumn {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl FeatureColumn {
    fn len(&self) -> usize {
        match self {
            FeatureColumn::Numeric(v) => v.len(),
            FeatureColumn::Categorical(v) => v.len(),
        }
    }

    fn subset(&self, indices: &[usize]) -> Self {
        match self {
            FeatureColumn::Numeric(v) => {
                FeatureColumn::Numeric(indices.iter().map(|&i| v[i]).collect())
            }
            FeatureColumn::Categorical(v) => {
                FeatureColumn::Categorical(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }
}

/// Owned, row-subsettable view of the feature frame
#[derive(Debug, Clone)]
pub struct Table {
    pub names: Vec<String>,
    pub columns: Vec<FeatureColumn>,
    pub n_rows: usize,
}

impl Table {
    /// Extract all columns from a polars frame.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let mut names = Vec::with_capacity(df.width());
        let mut columns = Vec::with_capacity(df.width());

        for col in df.get_columns() {
            let series = col.as_materialized_series();
            let name = col.name().to_string();
            let extracted = match series.dtype() {
                DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
                | DataType::Boolean => {
                    let casted = series.cast(&DataType::Float64)?;
                    let ca = casted
                        .f64()
                        .map_err(|e| PipetuneError::DataError(e.to_string()))?;
                    FeatureColumn::Numeric(ca.into_iter().collect())
                }
                DataType::String => {
                    let ca = series
                        .str()
                        .map_err(|e| PipetuneError::DataError(e.to_string()))?;
                    FeatureColumn::Categorical(
                        ca.into_iter().map(|v| v.map(|s| s.to_string())).collect(),
                    )
                }
                other => {
                    return Err(PipetuneError::InvalidInput(format!(
                        "unsupported dtype {other:?} for feature column '{name}'"
                    )))
                }
            };
            names.push(name);
            columns.push(extracted);
        }

        Ok(Self {
            names,
            columns,
            n_rows: df.height(),
        })
    }

    /// Take the given rows, in order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.subset(indices)).collect(),
            n_rows: indices.len(),
        }
    }

    /// Number of columns
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Sanity check that all columns agree on row count.
    pub fn validate(&self) -> Result<()> {
        for (name, col) in self.names.iter().zip(&self.columns) {
            if col.len() != self.n_rows {
                return Err(PipetuneError::DataError(format!(
                    "column '{name}' has {} rows, expected {}",
                    col.len(),
                    self.n_rows
                )));
            }
        }
        Ok(())
    }
}
