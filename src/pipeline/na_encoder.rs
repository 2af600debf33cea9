//! Missing-value encoder, the first pipeline stage

use crate::dataset::{FeatureColumn, Table};
use crate::error::{PipetuneError, Result};
use crate::namespace::ParamValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fill strategy for numeric columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumericStrategy {
    Mean,
    Median,
    MostFrequent,
    Constant(f64),
}

/// Fill strategy for categorical columns: mode, or a literal token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CategoricalStrategy {
    MostFrequent,
    Constant(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FillValue {
    Numeric(f64),
    Token(String),
}

/// Encodes missing values with per-column fill values computed at fit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaEncoder {
    numerical_strategy: NumericStrategy,
    categorical_strategy: CategoricalStrategy,
    fill_values: Vec<FillValue>,
    is_fitted: bool,
}

impl Default for NaEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NaEncoder {
    pub fn new() -> Self {
        Self {
            numerical_strategy: NumericStrategy::Mean,
            categorical_strategy: CategoricalStrategy::Constant("<NULL>".to_string()),
            fill_values: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "numerical_strategy: {:?}, categorical_strategy: {:?}",
            self.numerical_strategy, self.categorical_strategy
        )
    }

    pub fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "numerical_strategy" => {
                self.numerical_strategy = match value {
                    ParamValue::Str(s) => match s.as_str() {
                        "mean" => NumericStrategy::Mean,
                        "median" => NumericStrategy::Median,
                        "most_frequent" => NumericStrategy::MostFrequent,
                        other => {
                            return Err(PipetuneError::InvalidPipelineParams(format!(
                                "unknown numerical strategy '{other}'"
                            )))
                        }
                    },
                    ParamValue::Float(v) => NumericStrategy::Constant(*v),
                    ParamValue::Int(v) => NumericStrategy::Constant(*v as f64),
                    _ => {
                        return Err(PipetuneError::InvalidPipelineParams(format!(
                            "invalid value '{value}' for parameter 'ne__{name}'"
                        )))
                    }
                };
            }
            "categorical_strategy" => {
                let s = value.as_str().ok_or_else(|| {
                    PipetuneError::InvalidPipelineParams(format!(
                        "invalid value '{value}' for parameter 'ne__{name}'"
                    ))
                })?;
                self.categorical_strategy = if s == "most_frequent" {
                    CategoricalStrategy::MostFrequent
                } else {
                    CategoricalStrategy::Constant(s.to_string())
                };
            }
            _ => {
                return Err(PipetuneError::InvalidPipelineParams(format!(
                    "NA encoder has no parameter '{name}'"
                )))
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, table: &Table) -> Result<()> {
        self.fill_values = table
            .columns
            .iter()
            .map(|col| self.compute_fill(col))
            .collect::<Result<Vec<_>>>()?;
        self.is_fitted = true;
        Ok(())
    }

    pub fn transform(&self, table: &Table) -> Result<Table> {
        if !self.is_fitted {
            return Err(PipetuneError::EvaluationFailure(
                "NA encoder is not fitted".to_string(),
            ));
        }
        if self.fill_values.len() != table.n_cols() {
            return Err(PipetuneError::EvaluationFailure(format!(
                "NA encoder fitted on {} columns, got {}",
                self.fill_values.len(),
                table.n_cols()
            )));
        }

        let columns = table
            .columns
            .iter()
            .zip(&self.fill_values)
            .map(|(col, fill)| match (col, fill) {
                (FeatureColumn::Numeric(values), FillValue::Numeric(f)) => {
                    FeatureColumn::Numeric(values.iter().map(|v| Some(v.unwrap_or(*f))).collect())
                }
                (FeatureColumn::Categorical(values), FillValue::Token(t)) => {
                    FeatureColumn::Categorical(
                        values
                            .iter()
                            .map(|v| Some(v.clone().unwrap_or_else(|| t.clone())))
                            .collect(),
                    )
                }
                // column kind changed between fit and transform
                (col, _) => col.clone(),
            })
            .collect();

        Ok(Table {
            names: table.names.clone(),
            columns,
            n_rows: table.n_rows,
        })
    }

    pub fn fit_transform(&mut self, table: &Table) -> Result<Table> {
        self.fit(table)?;
        self.transform(table)
    }

    fn compute_fill(&self, col: &FeatureColumn) -> Result<FillValue> {
        match col {
            FeatureColumn::Numeric(values) => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                let fill = match &self.numerical_strategy {
                    NumericStrategy::Constant(v) => *v,
                    _ if present.is_empty() => 0.0,
                    NumericStrategy::Mean => {
                        present.iter().sum::<f64>() / present.len() as f64
                    }
                    NumericStrategy::Median => {
                        let mut sorted = present.clone();
                        sorted.sort_by(|a, b| {
                            a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                        });
                        let mid = sorted.len() / 2;
                        if sorted.len() % 2 == 0 {
                            (sorted[mid - 1] + sorted[mid]) / 2.0
                        } else {
                            sorted[mid]
                        }
                    }
                    NumericStrategy::MostFrequent => {
                        let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
                        for &v in &present {
                            let entry = counts.entry(v.to_bits()).or_insert((v, 0));
                            entry.1 += 1;
                        }
                        counts
                            .values()
                            .max_by_key(|(_, count)| *count)
                            .map(|(v, _)| *v)
                            .unwrap_or(0.0)
                    }
                };
                Ok(FillValue::Numeric(fill))
            }
            FeatureColumn::Categorical(values) => {
                let token = match &self.categorical_strategy {
                    CategoricalStrategy::Constant(t) => t.clone(),
                    CategoricalStrategy::MostFrequent => {
                        let mut counts: HashMap<&str, usize> = HashMap::new();
                        for v in values.iter().flatten() {
                            *counts.entry(v.as_str()).or_insert(0) += 1;
                        }
                        counts
                            .into_iter()
                            .max_by_key(|(_, count)| *count)
                            .map(|(v, _)| v.to_string())
                            .unwrap_or_else(|| "<NULL>".to_string())
                    }
                };
                Ok(FillValue::Token(token))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_missing() -> Table {
        Table {
            names: vec!["num".to_string(), "cat".to_string()],
            columns: vec![
                FeatureColumn::Numeric(vec![Some(1.0), None, Some(3.0), Some(3.0)]),
                FeatureColumn::Categorical(vec![
                    Some("a".to_string()),
                    Some("a".to_string()),
                    None,
                    Some("b".to_string()),
                ]),
            ],
            n_rows: 4,
        }
    }

    fn numeric_values(table: &Table, col: usize) -> Vec<Option<f64>> {
        match &table.columns[col] {
            FeatureColumn::Numeric(v) => v.clone(),
            _ => panic!("expected numeric column"),
        }
    }

    #[test]
    fn test_mean_fill_and_null_token() {
        let table = table_with_missing();
        let mut encoder = NaEncoder::new();
        let out = encoder.fit_transform(&table).unwrap();

        let nums = numeric_values(&out, 0);
        assert_eq!(nums[1], Some(7.0 / 3.0));

        match &out.columns[1] {
            FeatureColumn::Categorical(v) => assert_eq!(v[2], Some("<NULL>".to_string())),
            _ => panic!("expected categorical column"),
        }
    }

    #[test]
    fn test_median_and_most_frequent() {
        let table = table_with_missing();
        let mut encoder = NaEncoder::new();
        encoder
            .set_param("numerical_strategy", &ParamValue::Str("median".into()))
            .unwrap();
        encoder
            .set_param("categorical_strategy", &ParamValue::Str("most_frequent".into()))
            .unwrap();
        let out = encoder.fit_transform(&table).unwrap();

        let nums = numeric_values(&out, 0);
        assert_eq!(nums[1], Some(3.0));

        match &out.columns[1] {
            FeatureColumn::Categorical(v) => assert_eq!(v[2], Some("a".to_string())),
            _ => panic!("expected categorical column"),
        }
    }

    #[test]
    fn test_constant_fill() {
        let table = table_with_missing();
        let mut encoder = NaEncoder::new();
        encoder
            .set_param("numerical_strategy", &ParamValue::Float(-1.0))
            .unwrap();
        let out = encoder.fit_transform(&table).unwrap();
        assert_eq!(numeric_values(&out, 0)[1], Some(-1.0));
    }

    #[test]
    fn test_unknown_param_rejected() {
        let mut encoder = NaEncoder::new();
        assert!(encoder.set_param("strategy", &ParamValue::Str("mean".into())).is_err());
        assert!(encoder
            .set_param("numerical_strategy", &ParamValue::Str("mode".into()))
            .is_err());
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let table = table_with_missing();
        let encoder = NaEncoder::new();
        assert!(encoder.transform(&table).is_err());
    }
}
