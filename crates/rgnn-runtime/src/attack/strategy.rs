//! PPR update strategies injected into the local attack driver.

use rgnn_core::error::{PprError, Result};
use rgnn_core::perturb::materialize_perturbation;
use rgnn_core::ppr::{ppr_update_row, repair_disconnected, topk_ppr_matrix_with_alpha, PprConfig, PprNormalization};
use rgnn_core::sparse::{SparseMatrix, SparseVector};
use tracing::debug;

use super::RecalcAlpha;

/// Read-only inputs shared by every update within an episode.
#[derive(Debug, Clone, Copy)]
pub struct PprContext<'a> {
    /// Clean adjacency.
    pub adjacency: &'a SparseMatrix,
    /// Cached `n x n` PPR matrix.
    pub ppr: &'a SparseMatrix,
    pub config: &'a PprConfig,
    pub undirected: bool,
}

impl PprContext<'_> {
    /// Rank-one update of the cached row, truncated to `topk`.
    pub fn incremental_row(&self, node_idx: usize, delta: &SparseVector) -> Result<SparseVector> {
        let adj_row = self.adjacency.row(node_idx)?;
        let row = ppr_update_row(self.ppr, &adj_row, delta, node_idx, self.config.alpha)?;
        Ok(row.top_k(self.config.topk))
    }

    /// Exact PPR row of `node_idx` on the materialized, repaired adjacency.
    pub fn exact_row(&self, node_idx: usize, delta: &SparseVector, alpha: f64) -> Result<SparseVector> {
        let perturbed = materialize_perturbation(self.adjacency, node_idx, delta, self.undirected)?;
        let (repaired, disconnected) = repair_disconnected(&perturbed)?;
        if !disconnected.is_empty() {
            debug!(node = node_idx, ?disconnected, "perturbation disconnected nodes");
        }
        topk_ppr_matrix_with_alpha(&repaired, alpha, self.config, &[node_idx])?.row(0)
    }
}

/// How an episode turns a perturbation into a PPR row.
pub trait PprUpdate {
    fn name(&self) -> &'static str;

    /// Reject PPR configurations the strategy cannot handle.
    fn check(&self, _config: &PprConfig) -> Result<()> {
        Ok(())
    }

    /// Row used to score relaxed weights during the search.
    fn search_row(&self, ctx: &PprContext<'_>, node_idx: usize, delta: &SparseVector) -> Result<SparseVector>;

    /// Row reported for the resolved discrete perturbation.
    fn final_row(
        &self,
        ctx: &PprContext<'_>,
        node_idx: usize,
        delta: &SparseVector,
        n_perturbations: usize,
    ) -> Result<SparseVector>;
}

fn require_row_normalization(config: &PprConfig) -> Result<()> {
    if config.normalization != PprNormalization::Row {
        return Err(PprError::UnsupportedNormalization(config.normalization.to_string()).into());
    }
    Ok(())
}

/// Incremental update throughout.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalUpdate;

impl PprUpdate for IncrementalUpdate {
    fn name(&self) -> &'static str {
        "incremental"
    }

    fn check(&self, config: &PprConfig) -> Result<()> {
        require_row_normalization(config)
    }

    fn search_row(&self, ctx: &PprContext<'_>, node_idx: usize, delta: &SparseVector) -> Result<SparseVector> {
        ctx.incremental_row(node_idx, delta)
    }

    fn final_row(
        &self,
        ctx: &PprContext<'_>,
        node_idx: usize,
        delta: &SparseVector,
        _n_perturbations: usize,
    ) -> Result<SparseVector> {
        ctx.incremental_row(node_idx, delta)
    }
}

/// Incremental search, exact recomputation for the final row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecalcAtEnd {
    pub alpha: RecalcAlpha,
}

impl RecalcAtEnd {
    pub fn new(alpha: RecalcAlpha) -> Self {
        Self { alpha }
    }
}

impl PprUpdate for RecalcAtEnd {
    fn name(&self) -> &'static str {
        "recalc_at_end"
    }

    fn check(&self, config: &PprConfig) -> Result<()> {
        require_row_normalization(config)
    }

    fn search_row(&self, ctx: &PprContext<'_>, node_idx: usize, delta: &SparseVector) -> Result<SparseVector> {
        ctx.incremental_row(node_idx, delta)
    }

    fn final_row(
        &self,
        ctx: &PprContext<'_>,
        node_idx: usize,
        delta: &SparseVector,
        n_perturbations: usize,
    ) -> Result<SparseVector> {
        let alpha = self.alpha.resolve(ctx.config.alpha, n_perturbations);
        debug!(node = node_idx, alpha, "recomputing final PPR row");
        ctx.exact_row(node_idx, delta, alpha)
    }
}

/// Exact recomputation for every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullRecompute;

impl PprUpdate for FullRecompute {
    fn name(&self) -> &'static str {
        "full"
    }

    fn search_row(&self, ctx: &PprContext<'_>, node_idx: usize, delta: &SparseVector) -> Result<SparseVector> {
        ctx.exact_row(node_idx, delta, ctx.config.alpha)
    }

    fn final_row(
        &self,
        ctx: &PprContext<'_>,
        node_idx: usize,
        delta: &SparseVector,
        _n_perturbations: usize,
    ) -> Result<SparseVector> {
        ctx.exact_row(node_idx, delta, ctx.config.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgnn_core::error::RgnnError;
    use rgnn_core::ppr::topk_ppr_matrix;

    fn path4() -> SparseMatrix {
        let rows = [0, 1, 1, 2, 2, 3];
        let cols = [1, 0, 2, 1, 3, 2];
        SparseMatrix::from_triplets((4, 4), &rows, &cols, &[1.0; 6]).unwrap()
    }

    fn exact_config() -> PprConfig {
        PprConfig::new(0.2, 1e-10, 4, PprNormalization::Row)
    }

    #[test]
    fn incremental_and_full_agree_on_directed_flip() {
        let adj = path4();
        let config = exact_config();
        let ppr = topk_ppr_matrix(&adj, &config, &[0, 1, 2, 3]).unwrap();
        let ctx = PprContext {
            adjacency: &adj,
            ppr: &ppr,
            config: &config,
            undirected: false,
        };
        let delta = SparseVector::from_pairs(4, [(3, 1.0)]).unwrap();
        let fast = IncrementalUpdate.search_row(&ctx, 0, &delta).unwrap();
        let slow = FullRecompute.search_row(&ctx, 0, &delta).unwrap();
        for j in 0..4 {
            assert!((fast.get(j) - slow.get(j)).abs() < 1e-6, "column {}", j);
        }
    }

    #[test]
    fn empty_delta_keeps_the_cached_row() {
        let adj = path4();
        let config = exact_config();
        let ppr = topk_ppr_matrix(&adj, &config, &[0, 1, 2, 3]).unwrap();
        let ctx = PprContext {
            adjacency: &adj,
            ppr: &ppr,
            config: &config,
            undirected: true,
        };
        let row = IncrementalUpdate.final_row(&ctx, 1, &SparseVector::zeros(4), 0).unwrap();
        let cached = ppr.row(1).unwrap();
        for j in 0..4 {
            assert!((row.get(j) - cached.get(j)).abs() < 1e-12);
        }
    }

    #[test]
    fn recalc_at_end_offsets_alpha_by_budget() {
        let adj = path4();
        let config = exact_config();
        let ppr = topk_ppr_matrix(&adj, &config, &[0, 1, 2, 3]).unwrap();
        let ctx = PprContext {
            adjacency: &adj,
            ppr: &ppr,
            config: &config,
            undirected: true,
        };
        let delta = SparseVector::from_pairs(4, [(2, 1.0)]).unwrap();
        // teleport above one keeps all mass on the source
        let row = RecalcAtEnd::default().final_row(&ctx, 0, &delta, 1).unwrap();
        assert_eq!(row.nnz(), 1);
        assert!((row.get(0) - 1.2).abs() < 1e-12);

        let row = RecalcAtEnd::new(RecalcAlpha::Surrogate).final_row(&ctx, 0, &delta, 1).unwrap();
        assert!(row.nnz() > 1);
    }

    #[test]
    fn incremental_strategies_need_row_normalization() {
        let config = PprConfig::new(0.2, 1e-4, 4, PprNormalization::Sym);
        assert!(matches!(
            IncrementalUpdate.check(&config),
            Err(RgnnError::Ppr(PprError::UnsupportedNormalization(_)))
        ));
        assert!(RecalcAtEnd::default().check(&config).is_err());
        assert!(FullRecompute.check(&config).is_ok());
    }
}
