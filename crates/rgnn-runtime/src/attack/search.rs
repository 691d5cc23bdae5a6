//! Relaxed search space of a single-node episode.

use rand::seq::SliceRandom;
use rand::Rng;
use rgnn_core::error::Result;
use rgnn_core::sparse::SparseVector;
use std::collections::HashSet;

/// Weight given to freshly sampled candidates.
pub const INIT_WEIGHT: f64 = 1e-7;

/// Candidates at or below this weight are replaced when resampling.
pub const RESAMPLE_THRESHOLD: f64 = 1e-3;

const BISECTION_STEPS: usize = 64;
const BISECTION_TOL: f64 = 1e-9;

/// Candidate columns of the target row with relaxed flip weights.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    dim: usize,
    columns: Vec<usize>,
    weights: Vec<f64>,
}

impl SearchSpace {
    /// Draw up to `size` distinct columns from `pool` without replacement.
    pub fn sample<R: Rng + ?Sized>(dim: usize, pool: &[usize], size: usize, rng: &mut R) -> Self {
        let mut columns: Vec<usize> = pool.choose_multiple(rng, size.min(pool.len())).copied().collect();
        columns.sort_unstable();
        let weights = vec![INIT_WEIGHT; columns.len()];
        Self { dim, columns, weights }
    }

    /// A search space over explicit `(column, weight)` pairs.
    pub fn from_pairs(dim: usize, pairs: impl IntoIterator<Item = (usize, f64)>) -> Self {
        let mut pairs: Vec<(usize, f64)> = pairs.into_iter().collect();
        pairs.sort_unstable_by_key(|&(c, _)| c);
        pairs.dedup_by_key(|&mut (c, _)| c);
        let (columns, weights) = pairs.into_iter().unzip();
        Self { dim, columns, weights }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Relaxed perturbation row.
    pub fn delta(&self) -> Result<SparseVector> {
        SparseVector::from_pairs(self.dim, self.columns.iter().copied().zip(self.weights.iter().copied()))
    }

    /// Perturbation row with candidate `k` set to `weight`.
    pub fn delta_with(&self, k: usize, weight: f64) -> Result<SparseVector> {
        SparseVector::from_pairs(
            self.dim,
            self.columns
                .iter()
                .zip(&self.weights)
                .enumerate()
                .map(|(i, (&c, &w))| (c, if i == k { weight } else { w })),
        )
    }

    /// Replace near-zero candidates with unused columns from `pool`.
    ///
    /// Candidates are only dropped while fresh columns remain. Returns the
    /// number of replaced candidates.
    pub fn resample<R: Rng + ?Sized>(&mut self, pool: &[usize], rng: &mut R) -> usize {
        let dead: Vec<usize> = (0..self.len())
            .filter(|&k| self.weights[k] <= RESAMPLE_THRESHOLD)
            .collect();
        if dead.is_empty() {
            return 0;
        }
        let used: HashSet<usize> = self.columns.iter().copied().collect();
        let fresh: Vec<usize> = pool.iter().copied().filter(|c| !used.contains(c)).collect();
        let replaced = dead.len().min(fresh.len());
        if replaced == 0 {
            return 0;
        }
        let drop: HashSet<usize> = dead.into_iter().take(replaced).collect();
        let kept = (0..self.len())
            .filter(|k| !drop.contains(k))
            .map(|k| (self.columns[k], self.weights[k]));
        let replacements = fresh.choose_multiple(rng, replaced).map(|&c| (c, INIT_WEIGHT));
        *self = Self::from_pairs(self.dim, kept.chain(replacements).collect::<Vec<_>>());
        replaced
    }

    /// Positions of the `k` heaviest candidates, ties broken by column.
    pub fn top_positions(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.weights[b]
                .total_cmp(&self.weights[a])
                .then(self.columns[a].cmp(&self.columns[b]))
        });
        order.truncate(k);
        order
    }

    /// Bernoulli sample of the candidates, trimmed or topped up to exactly
    /// `budget` positions by weight.
    pub fn sample_discrete<R: Rng + ?Sized>(&self, budget: usize, rng: &mut R) -> Vec<usize> {
        let drawn: Vec<usize> = (0..self.len())
            .filter(|&k| rng.gen::<f64>() < self.weights[k])
            .collect();
        let ranked = self.top_positions(self.len());
        let mut chosen: Vec<usize> = ranked.iter().copied().filter(|k| drawn.contains(k)).take(budget).collect();
        for k in ranked {
            if chosen.len() >= budget {
                break;
            }
            if !chosen.contains(&k) {
                chosen.push(k);
            }
        }
        chosen.sort_unstable();
        chosen
    }

    /// Discrete flip row for candidate positions `positions`.
    pub fn discrete_delta(&self, positions: &[usize]) -> Result<SparseVector> {
        SparseVector::from_pairs(self.dim, positions.iter().map(|&k| (self.columns[k], 1.0)))
    }
}

/// Clamp `weights` to `[0, 1]` and, if their sum exceeds `budget`, shift
/// them by the bisection root `mu` of `sum(clamp(w - mu, 0, 1)) = budget`.
pub fn project_to_budget(weights: &mut [f64], budget: f64) {
    for w in weights.iter_mut() {
        *w = if w.is_finite() { w.clamp(0.0, 1.0) } else { 0.0 };
    }
    if weights.iter().sum::<f64>() <= budget {
        return;
    }
    let mass = |mu: f64, ws: &[f64]| ws.iter().map(|w| (w - mu).clamp(0.0, 1.0)).sum::<f64>();
    let mut lo = weights.iter().copied().fold(f64::INFINITY, f64::min) - 1.0;
    let mut hi = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut mu = hi;
    for _ in 0..BISECTION_STEPS {
        mu = 0.5 * (lo + hi);
        let excess = mass(mu, &*weights) - budget;
        if excess.abs() <= BISECTION_TOL {
            break;
        }
        if excess > 0.0 {
            lo = mu;
        } else {
            hi = mu;
        }
    }
    for w in weights.iter_mut() {
        *w = (*w - mu).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn sampling_draws_distinct_pool_columns() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pool = [1, 3, 4, 8, 9];
        let space = SearchSpace::sample(10, &pool, 3, &mut rng);
        assert_eq!(space.len(), 3);
        assert!(space.columns().windows(2).all(|w| w[0] < w[1]));
        assert!(space.columns().iter().all(|c| pool.contains(c)));
        assert!(space.weights().iter().all(|&w| w == INIT_WEIGHT));

        let all = SearchSpace::sample(10, &pool, 50, &mut rng);
        assert_eq!(all.columns(), &pool);
    }

    #[test]
    fn projection_respects_budget() {
        let mut w = vec![0.9, 0.8, 1.7, -0.2, 0.5];
        project_to_budget(&mut w, 2.0);
        let total: f64 = w.iter().sum();
        assert!((total - 2.0).abs() < 1e-6);
        assert!(w.iter().all(|&x| (0.0..=1.0).contains(&x)));
        // order is preserved
        assert!(w[2] >= w[0] && w[0] >= w[1] && w[1] >= w[4]);
    }

    #[test]
    fn projection_below_budget_only_clamps() {
        let mut w = vec![0.2, -1.0, f64::NAN];
        project_to_budget(&mut w, 1.0);
        assert_eq!(w, vec![0.2, 0.0, 0.0]);
    }

    #[test]
    fn discrete_samples_hit_the_budget() {
        let space = SearchSpace::from_pairs(6, [(1, 0.9), (2, 0.05), (4, 0.6), (5, 0.0)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for budget in 0..=4 {
            let chosen = space.sample_discrete(budget, &mut rng);
            assert_eq!(chosen.len(), budget);
        }
        assert_eq!(space.top_positions(2), vec![0, 2]);
        let delta = space.discrete_delta(&[0, 2]).unwrap();
        assert_eq!(delta.indices(), &[1, 4]);
        assert_eq!(delta.values(), &[1.0, 1.0]);
    }

    #[test]
    fn resampling_replaces_dead_candidates() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut space = SearchSpace::from_pairs(8, [(1, 0.5), (2, 0.0), (3, 1e-5)]);
        let pool: Vec<usize> = (1..8).collect();
        assert_eq!(space.resample(&pool, &mut rng), 2);
        assert_eq!(space.len(), 3);
        assert!(space.columns().contains(&1));
        let fresh: Vec<usize> = space.columns().iter().copied().filter(|&c| c != 1).collect();
        assert!(fresh.iter().all(|c| ![1, 2, 3].contains(c)));
    }

    #[test]
    fn resampling_never_shrinks_the_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut space = SearchSpace::from_pairs(5, [(0, 0.0), (1, 0.0), (3, 0.9), (4, 0.0)]);
        assert_eq!(space.resample(&[0, 1, 3, 4], &mut rng), 0);
        assert_eq!(space.len(), 4);
        assert_eq!(space.resample(&[0, 1, 2, 3, 4], &mut rng), 1);
        assert_eq!(space.len(), 4);
        assert!(space.columns().contains(&2));
    }
}
