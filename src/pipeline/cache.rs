//! On-disk cache for expensive stage fits
//!
//! A cache entry pairs the fitted stage state with the matrix it produced,
//! keyed by the stage tag, its unfitted configuration, and a fingerprint of
//! the input it was fitted on. A hit restores both, so a reused stage can
//! still transform unseen rows.

use crate::error::{PipetuneError, Result};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct CachedMatrix {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    stage: serde_json::Value,
    output: CachedMatrix,
}

/// Stage-level fit cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct TransformCache {
    dir: PathBuf,
}

impl TransformCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Fit the stage through `fit`, or restore a previous identical fit.
    ///
    /// The key is computed before fitting, from the stage's current
    /// (unfitted) configuration and the input fingerprint.
    pub fn fit_or_reuse<S, F>(
        &self,
        tag: &str,
        stage: &mut S,
        input_fingerprint: u64,
        fit: F,
    ) -> Result<Array2<f64>>
    where
        S: Serialize + DeserializeOwned,
        F: FnOnce(&mut S) -> Result<Array2<f64>>,
    {
        let config = serde_json::to_string(stage)?;
        let key = cache_key(tag, &config, input_fingerprint);
        let path = self.dir.join(format!("{tag}_{key:016x}.json"));

        if path.is_file() {
            match self.load(&path) {
                Ok((restored, output)) => {
                    *stage = serde_json::from_value(restored)?;
                    tracing::debug!(tag, key = format_args!("{key:016x}"), "cache hit");
                    return Ok(output);
                }
                Err(e) => {
                    // stale or corrupt entry, refit over it
                    tracing::warn!(tag, error = %e, "discarding unreadable cache entry");
                }
            }
        }

        let output = fit(&mut *stage)?;
        let entry = CacheEntry {
            stage: serde_json::to_value(&*stage)?,
            output: CachedMatrix {
                nrows: output.nrows(),
                ncols: output.ncols(),
                data: output.iter().copied().collect(),
            },
        };
        std::fs::write(&path, serde_json::to_vec(&entry)?)?;
        tracing::debug!(tag, key = format_args!("{key:016x}"), "cache store");
        Ok(output)
    }

    fn load(&self, path: &std::path::Path) -> Result<(serde_json::Value, Array2<f64>)> {
        let bytes = std::fs::read(path)?;
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        let output =
            Array2::from_shape_vec((entry.output.nrows, entry.output.ncols), entry.output.data)
                .map_err(|e| PipetuneError::DataError(e.to_string()))?;
        Ok((entry.stage, output))
    }
}

fn cache_key(tag: &str, config: &str, input_fingerprint: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    tag.hash(&mut hasher);
    config.hash(&mut hasher);
    input_fingerprint.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a numeric matrix, for cache keys.
pub fn matrix_fingerprint(x: &Array2<f64>) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.nrows().hash(&mut hasher);
    x.ncols().hash(&mut hasher);
    for v in x.iter() {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// Fingerprint of a slice of row indices, for cache keys that depend on the
/// fold a stage was fitted on.
pub fn indices_fingerprint(indices: &[usize]) -> u64 {
    let mut hasher = DefaultHasher::new();
    indices.hash(&mut hasher);
    hasher.finish()
}
