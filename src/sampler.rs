//! Sequential model-based search primitive
//!
//! The optimiser drives any [`SearchAlgorithm`]: it asks for the next
//! parameter vector in sampled form, evaluates it, and feeds the scalar
//! loss back so the algorithm can update its internal model before the next
//! proposal. Choice dimensions are proposed and tracked as indices into the
//! declared value list; translating them back to domain values is the
//! caller's job.

use crate::search_space::{Dimension, SamplerSpace};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// One sampled coordinate
#[derive(Debug, Clone, PartialEq)]
pub enum SampledValue {
    /// Domain value of a uniform dimension
    Continuous(f64),
    /// Index into the declared values of a choice dimension
    Index(usize),
}

/// One proposed parameter vector, in sampled (internal) form
pub type SampledVector = BTreeMap<String, SampledValue>;

/// Contract of the sequential search primitive: propose, observe, repeat.
/// The evaluation budget is owned by the caller.
pub trait SearchAlgorithm {
    /// Propose the next parameter vector.
    fn suggest(&mut self, space: &SamplerSpace) -> SampledVector;

    /// Record the loss observed for a proposed vector (lower is better).
    fn observe(&mut self, vector: SampledVector, loss: f64);

    /// The best vector observed so far, if any trial has completed.
    fn best(&self) -> Option<&SampledVector>;
}

impl<A: SearchAlgorithm + ?Sized> SearchAlgorithm for &mut A {
    fn suggest(&mut self, space: &SamplerSpace) -> SampledVector {
        (**self).suggest(space)
    }

    fn observe(&mut self, vector: SampledVector, loss: f64) {
        (**self).observe(vector, loss)
    }

    fn best(&self) -> Option<&SampledVector> {
        (**self).best()
    }
}

/// Default sequential sampler: a seeded random startup phase, then sampling
/// concentrated on the region spanned by the best-observed trials.
#[derive(Debug, Clone)]
pub struct AdaptiveSampler {
    rng: ChaCha8Rng,
    n_startup: usize,
    /// Fraction of trials considered "top" when narrowing
    gamma: f64,
    history: Vec<(SampledVector, f64)>,
}

impl AdaptiveSampler {
    pub fn new(random_state: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(random_state),
            n_startup: 10,
            gamma: 0.2,
            history: Vec::new(),
        }
    }

    /// Number of purely random trials before the model kicks in.
    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup = n;
        self
    }

    fn random_vector(&mut self, space: &SamplerSpace) -> SampledVector {
        let mut vector = SampledVector::new();
        for (key, dim) in &space.dims {
            let value = match dim {
                Dimension::Uniform { low, high } => {
                    SampledValue::Continuous(self.rng.gen_range(*low..=*high))
                }
                Dimension::Choice { cardinality } => {
                    SampledValue::Index(self.rng.gen_range(0..*cardinality))
                }
            };
            vector.insert(key.clone(), value);
        }
        vector
    }

    /// Indices of the top `gamma` fraction of trials by ascending loss.
    fn top_trials(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.history.len()).collect();
        order.sort_by(|&a, &b| {
            self.history[a]
                .1
                .partial_cmp(&self.history[b].1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top_n = ((order.len() as f64 * self.gamma).ceil() as usize).max(1);
        order.truncate(top_n);
        order
    }
}

impl SearchAlgorithm for AdaptiveSampler {
    fn suggest(&mut self, space: &SamplerSpace) -> SampledVector {
        if self.history.len() < self.n_startup {
            return self.random_vector(space);
        }

        let top = self.top_trials();
        let mut vector = SampledVector::new();

        for (key, dim) in &space.dims {
            let value = match dim {
                Dimension::Uniform { low, high } => {
                    let observed: Vec<f64> = top
                        .iter()
                        .filter_map(|&i| match self.history[i].0.get(key) {
                            Some(SampledValue::Continuous(v)) => Some(*v),
                            _ => None,
                        })
                        .collect();

                    let (mut lo, mut hi) = observed
                        .iter()
                        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                            (lo.min(v), hi.max(v))
                        });
                    // 10% margin around the promising region, clamped to the
                    // declared interval
                    let margin = (hi - lo) * 0.1;
                    lo = (lo - margin).max(*low);
                    hi = (hi + margin).min(*high);
                    if !(lo < hi) {
                        lo = *low;
                        hi = *high;
                    }
                    SampledValue::Continuous(self.rng.gen_range(lo..=hi))
                }
                Dimension::Choice { cardinality } => {
                    let observed: Vec<usize> = top
                        .iter()
                        .filter_map(|&i| match self.history[i].0.get(key) {
                            Some(SampledValue::Index(idx)) => Some(*idx),
                            _ => None,
                        })
                        .collect();

                    let idx = if !observed.is_empty() && self.rng.gen_bool(0.8) {
                        observed[self.rng.gen_range(0..observed.len())]
                    } else {
                        self.rng.gen_range(0..*cardinality)
                    };
                    SampledValue::Index(idx)
                }
            };
            vector.insert(key.clone(), value);
        }

        vector
    }

    fn observe(&mut self, vector: SampledVector, loss: f64) {
        self.history.push((vector, loss));
    }

    fn best(&self) -> Option<&SampledVector> {
        self.history
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(vector, _)| vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_space::Dimension;

    fn space() -> SamplerSpace {
        let mut dims = BTreeMap::new();
        dims.insert(
            "est__learning_rate".to_string(),
            Dimension::Uniform { low: 0.01, high: 1.0 },
        );
        dims.insert(
            "est__max_depth".to_string(),
            Dimension::Choice { cardinality: 3 },
        );
        SamplerSpace { dims }
    }

    #[test]
    fn test_samples_stay_in_bounds() {
        let space = space();
        let mut sampler = AdaptiveSampler::new(42);

        for trial in 0..50 {
            let vector = sampler.suggest(&space);
            match &vector["est__learning_rate"] {
                SampledValue::Continuous(v) => assert!((0.01..=1.0).contains(v)),
                _ => panic!("expected continuous sample"),
            }
            match &vector["est__max_depth"] {
                SampledValue::Index(i) => assert!(*i < 3),
                _ => panic!("expected index sample"),
            }
            sampler.observe(vector, trial as f64);
        }
    }

    #[test]
    fn test_best_is_lowest_loss() {
        let space = space();
        let mut sampler = AdaptiveSampler::new(1);

        let v1 = sampler.suggest(&space);
        sampler.observe(v1, 5.0);
        let v2 = sampler.suggest(&space);
        sampler.observe(v2.clone(), -2.0);
        let v3 = sampler.suggest(&space);
        sampler.observe(v3, 0.5);

        assert_eq!(sampler.best(), Some(&v2));
    }

    #[test]
    fn test_narrows_after_startup() {
        let space = space();
        let mut sampler = AdaptiveSampler::new(9).with_n_startup(5);

        // Reward samples near learning_rate = 0.1
        for _ in 0..30 {
            let vector = sampler.suggest(&space);
            let lr = match vector["est__learning_rate"] {
                SampledValue::Continuous(v) => v,
                _ => unreachable!(),
            };
            sampler.observe(vector, (lr - 0.1).abs());
        }

        let best = sampler.best().unwrap();
        match best["est__learning_rate"] {
            SampledValue::Continuous(v) => assert!((v - 0.1).abs() < 0.3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_deterministic_given_seed() {
        let space = space();
        let mut a = AdaptiveSampler::new(3);
        let mut b = AdaptiveSampler::new(3);
        for _ in 0..5 {
            let va = a.suggest(&space);
            let vb = b.suggest(&space);
            assert_eq!(va, vb);
            a.observe(va, 1.0);
            b.observe(vb, 1.0);
        }
    }

    #[test]
    fn test_infinite_loss_tolerated() {
        let space = space();
        let mut sampler = AdaptiveSampler::new(4);
        let v1 = sampler.suggest(&space);
        sampler.observe(v1, f64::INFINITY);
        let v2 = sampler.suggest(&space);
        sampler.observe(v2.clone(), 1.0);
        assert_eq!(sampler.best(), Some(&v2));
    }
}
