//! Cross-validation splitting

use crate::error::{PipetuneError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Splitting strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CvStrategy {
    /// Shuffled K-Fold
    KFold { n_splits: usize },
    /// Shuffled stratified K-Fold (maintains class distribution per fold)
    StratifiedKFold { n_splits: usize },
}

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CvSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Seeded cross-validation splitter. Fold order is deterministic for a
/// given seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidator {
    strategy: CvStrategy,
    random_state: u64,
}

impl CrossValidator {
    pub fn new(strategy: CvStrategy, random_state: u64) -> Self {
        Self {
            strategy,
            random_state,
        }
    }

    /// Number of folds produced per split call
    pub fn n_splits(&self) -> usize {
        match self.strategy {
            CvStrategy::KFold { n_splits } | CvStrategy::StratifiedKFold { n_splits } => n_splits,
        }
    }

    /// Generate train/test splits. `labels` is required for the stratified
    /// strategy and ignored otherwise.
    pub fn split(&self, n_samples: usize, labels: Option<&[i64]>) -> Result<Vec<CvSplit>> {
        match self.strategy {
            CvStrategy::KFold { n_splits } => self.k_fold(n_samples, n_splits),
            CvStrategy::StratifiedKFold { n_splits } => {
                let labels = labels.ok_or_else(|| {
                    PipetuneError::InvalidInput(
                        "stratified splitting requires target labels".to_string(),
                    )
                })?;
                self.stratified_k_fold(labels, n_splits)
            }
        }
    }

    fn k_fold(&self, n_samples: usize, n_splits: usize) -> Result<Vec<CvSplit>> {
        if n_splits < 2 {
            return Err(PipetuneError::InvalidInput(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < n_splits {
            return Err(PipetuneError::InvalidInput(format!(
                "n_samples ({n_samples}) must be >= n_splits ({n_splits})"
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        indices.shuffle(&mut rng);

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;

        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;
        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices: Vec<usize> = indices[current..current + fold_size].to_vec();
            let train_indices: Vec<usize> = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();
            splits.push(CvSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }

    fn stratified_k_fold(&self, labels: &[i64], n_splits: usize) -> Result<Vec<CvSplit>> {
        if n_splits < 2 {
            return Err(PipetuneError::InvalidInput(
                "n_splits must be at least 2".to_string(),
            ));
        }

        // Sorted class order keeps fold assignment reproducible.
        let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in labels.iter().enumerate() {
            class_indices.entry(label).or_default().push(idx);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];

        for indices in class_indices.values_mut() {
            indices.shuffle(&mut rng);
            for (i, &idx) in indices.iter().enumerate() {
                folds[i % n_splits].push(idx);
            }
        }

        let mut splits = Vec::with_capacity(n_splits);
        for fold_idx in 0..n_splits {
            let test_indices = folds[fold_idx].clone();
            let train_indices: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != fold_idx)
                .flat_map(|(_, f)| f.iter().copied())
                .collect();
            splits.push(CvSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
        }

        Ok(splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_fold_partition() {
        let cv = CrossValidator::new(CvStrategy::KFold { n_splits: 5 }, 1);
        let splits = cv.split(100, None).unwrap();
        assert_eq!(splits.len(), 5);

        for split in &splits {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_k_fold_deterministic() {
        let cv = CrossValidator::new(CvStrategy::KFold { n_splits: 4 }, 7);
        let a = cv.split(37, None).unwrap();
        let b = cv.split(37, None).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.test_indices, y.test_indices);
            assert_eq!(x.train_indices, y.train_indices);
        }
    }

    #[test]
    fn test_stratified_preserves_class_balance() {
        let labels: Vec<i64> = (0..40).map(|i| i % 2).collect();
        let cv = CrossValidator::new(CvStrategy::StratifiedKFold { n_splits: 4 }, 1);
        let splits = cv.split(40, Some(&labels)).unwrap();

        for split in &splits {
            let ones = split.test_indices.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(ones, 5);
            assert_eq!(split.test_indices.len(), 10);
        }
    }

    #[test]
    fn test_stratified_requires_labels() {
        let cv = CrossValidator::new(CvStrategy::StratifiedKFold { n_splits: 2 }, 1);
        assert!(cv.split(10, None).is_err());
    }

    #[test]
    fn test_too_few_samples() {
        let cv = CrossValidator::new(CvStrategy::KFold { n_splits: 5 }, 1);
        assert!(cv.split(3, None).is_err());
    }
}
