//! Generic single-node attack driver.

use super::search::{project_to_budget, SearchSpace};
use super::strategy::{PprContext, PprUpdate};
use super::{Attack, AttackKind, LocalAttackConfig, LocalPerturbation, PerturbedGraph};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rgnn_core::cache::{ArtifactStore, ArtifactStoreExt, CacheKey};
use rgnn_core::error::{AttackError, Result, RgnnError};
use rgnn_core::model::{log_softmax, NodeClassifier, Propagation};
use rgnn_core::perturb::materialize_perturbation;
use rgnn_core::ppr::{repair_disconnected, topk_ppr_matrix, PprConfig};
use rgnn_core::sparse::{SparseMatrix, SparseVector};
use rgnn_core::types::Dataset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where and under which dataset flags PPR matrices are cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PprCacheParams {
    pub storage_type: String,
    pub dataset: String,
    pub normalize: bool,
    pub make_undirected: bool,
    pub make_unweighted: bool,
}

impl PprCacheParams {
    /// Cache parameters matching the preparation flags of `dataset`.
    pub fn for_dataset(dataset: &Dataset, storage_type: impl Into<String>) -> Self {
        Self {
            storage_type: storage_type.into(),
            dataset: dataset.name.clone(),
            normalize: dataset.options.normalize,
            make_undirected: dataset.options.make_undirected,
            make_unweighted: dataset.options.make_unweighted,
        }
    }

    /// Key of the PPR matrix with rows `ppr_idx`.
    pub fn key(&self, config: &PprConfig, ppr_idx: &[usize]) -> CacheKey {
        CacheKey::new()
            .with("dataset", self.dataset.as_str())
            .with("alpha", config.alpha)
            .with_nodes("ppr_idx", ppr_idx)
            .with("eps", config.eps)
            .with("topk", config.topk)
            .with("ppr_normalization", config.normalization.to_string())
            .with("normalize", self.normalize)
            .with("make_undirected", self.make_undirected)
            .with("make_unweighted", self.make_unweighted)
    }
}

/// Load the PPR rows of `ppr_nodes` from the cache, or compute and store them.
pub fn load_or_compute_ppr(
    dataset: &Dataset,
    config: &PprConfig,
    ppr_nodes: &[usize],
    cache: Option<(&mut dyn ArtifactStore, &PprCacheParams)>,
) -> Result<SparseMatrix> {
    let adjacency = dataset.graph.adjacency();
    let expected = (ppr_nodes.len(), dataset.n_nodes());
    let Some((store, params)) = cache else {
        return topk_ppr_matrix(adjacency, config, ppr_nodes);
    };

    let key = params.key(config, ppr_nodes);
    match store.find_sparse_matrix(&params.storage_type, &key, true) {
        Ok(mut found) if found.len() == 1 => {
            let (matrix, meta) = found.remove(0);
            if matrix.shape() == expected {
                info!(id = %meta.id, dataset = %params.dataset, "loaded cached PPR matrix");
                return Ok(matrix);
            }
            warn!(
                id = %meta.id,
                found = ?matrix.shape(),
                ?expected,
                "cached PPR matrix has the wrong shape, recomputing"
            );
        }
        Ok(_) => debug!(dataset = %params.dataset, "no cached PPR matrix"),
        Err(e) => warn!(error = %e, "PPR cache lookup failed, recomputing"),
    }

    let matrix = topk_ppr_matrix(adjacency, config, ppr_nodes)?;
    if let Err(e) = store.save_sparse_matrix(&params.storage_type, &key, &matrix, true) {
        warn!(error = %e, "failed to cache PPR matrix");
    }
    Ok(matrix)
}

/// State of the current episode.
#[derive(Debug, Clone)]
struct Episode {
    node_idx: usize,
    n_perturbations: usize,
    space: SearchSpace,
    rng: ChaCha8Rng,
    /// Final PPR row once the perturbation is resolved.
    resolved: Option<SparseVector>,
}

/// Local attack driver, parameterized by its PPR update strategy.
pub struct LocalAttack<'a, U> {
    kind: AttackKind,
    dataset: &'a Dataset,
    surrogate: &'a dyn NodeClassifier,
    ppr_config: PprConfig,
    ppr_matrix: SparseMatrix,
    /// Columns eligible for perturbation, sorted.
    candidate_pool: Vec<usize>,
    config: LocalAttackConfig,
    update: U,
    episode: Option<Episode>,
}

impl<'a, U: PprUpdate> LocalAttack<'a, U> {
    pub fn new(
        kind: AttackKind,
        dataset: &'a Dataset,
        surrogate: &'a dyn NodeClassifier,
        idx_attack: &[usize],
        config: LocalAttackConfig,
        update: U,
        cache: Option<(&mut dyn ArtifactStore, &PprCacheParams)>,
    ) -> Result<Self> {
        config.validate()?;
        let ppr_config = surrogate.ppr_config().ok_or_else(|| {
            AttackError::IncompatibleParameters(format!(
                "surrogate '{}' has no PPR hyperparameters",
                surrogate.label()
            ))
        })?;
        ppr_config.validate()?;
        update.check(&ppr_config)?;

        let n = dataset.n_nodes();
        if let Some(&bad) = idx_attack.iter().find(|&&i| i >= n) {
            return Err(RgnnError::node_out_of_range(bad, n));
        }

        let candidate_pool: Vec<usize> = if config.attack_labeled_nodes_only {
            let mut nodes = idx_attack.to_vec();
            nodes.sort_unstable();
            nodes.dedup();
            nodes
        } else {
            (0..n).collect()
        };

        let ppr_matrix = load_or_compute_ppr(dataset, &ppr_config, &candidate_pool, cache)?;
        let ppr_matrix = if config.attack_labeled_nodes_only {
            ppr_matrix.scatter_rows(&candidate_pool, n)?
        } else {
            ppr_matrix
        };
        info!(
            attack = kind.name(),
            update = update.name(),
            shape = ?ppr_matrix.shape(),
            nnz = ppr_matrix.nnz(),
            "PPR matrix ready"
        );

        Ok(Self {
            kind,
            dataset,
            surrogate,
            ppr_config,
            ppr_matrix,
            candidate_pool,
            config,
            update,
            episode: None,
        })
    }

    pub fn ppr_matrix(&self) -> &SparseMatrix {
        &self.ppr_matrix
    }

    pub fn config(&self) -> &LocalAttackConfig {
        &self.config
    }

    fn ctx(&self) -> PprContext<'_> {
        PprContext {
            adjacency: self.dataset.graph.adjacency(),
            ppr: &self.ppr_matrix,
            config: &self.ppr_config,
            undirected: self.dataset.graph.is_undirected(),
        }
    }

    /// Reject nodes outside the graph, and in labeled-only mode nodes
    /// without a PPR row.
    fn check_node(&self, node_idx: usize) -> Result<()> {
        let n = self.dataset.n_nodes();
        if node_idx >= n {
            return Err(RgnnError::node_out_of_range(node_idx, n));
        }
        if self.config.attack_labeled_nodes_only && self.candidate_pool.binary_search(&node_idx).is_err() {
            return Err(AttackError::NotAttackable(node_idx).into());
        }
        Ok(())
    }

    fn episode_for(&self, node_idx: usize) -> Result<&Episode> {
        self.episode
            .as_ref()
            .filter(|e| e.node_idx == node_idx)
            .ok_or_else(|| AttackError::NotAttacked(node_idx).into())
    }

    fn episode_rng(&self, node_idx: usize) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(node_idx as u64))
    }

    /// Surrogate loss of `node_idx` under the PPR row `row`.
    fn loss(&self, node_idx: usize, row: &SparseVector) -> Result<f64> {
        let log_probs = self.get_logits(self.surrogate, node_idx, Some(row))?;
        let loss = self.config.loss.evaluate(&log_probs, self.dataset.labels[node_idx])?;
        if !loss.is_finite() {
            return Err(AttackError::NumericalDivergence {
                node: node_idx,
                reason: format!("loss is {}", loss),
            }
            .into());
        }
        Ok(loss)
    }

    fn search_loss(&self, ctx: &PprContext<'_>, node_idx: usize, delta: &SparseVector) -> Result<f64> {
        let row = self.update.search_row(ctx, node_idx, delta)?;
        self.loss(node_idx, &row)
    }

    /// Relaxed weight optimisation; returns the best search space seen.
    fn search(&self, node_idx: usize, budget: usize, pool: &[usize], rng: &mut ChaCha8Rng) -> Result<SearchSpace> {
        let ctx = self.ctx();
        let n = self.dataset.n_nodes();
        let size = self.config.search_space_size.max(budget).min(pool.len());
        let mut space = SearchSpace::sample(n, pool, size, rng);
        let budget_f = budget as f64;
        let step = self.config.probe_step;
        let mut best: Option<(f64, SearchSpace)> = None;

        for epoch in 0..self.config.epochs {
            let base = self.search_loss(&ctx, node_idx, &space.delta()?)?;
            if best.as_ref().map_or(true, |(b, _)| base > *b) {
                best = Some((base, space.clone()));
            }

            let mut scores = Vec::with_capacity(space.len());
            for k in 0..space.len() {
                let w = space.weights()[k];
                let h = if w + step <= 1.0 { step } else { -step };
                let probe = self.search_loss(&ctx, node_idx, &space.delta_with(k, w + h)?)?;
                scores.push((probe - base) / h);
            }

            let scale = scores.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
            if scale > 0.0 {
                let lr = self.config.lr_factor * budget_f / ((epoch + 1) as f64).sqrt();
                for (w, s) in space.weights_mut().iter_mut().zip(&scores) {
                    *w += lr * s / scale;
                }
            }
            project_to_budget(space.weights_mut(), budget_f);
            debug!(node = node_idx, epoch, loss = base, mass = space.weights().iter().sum::<f64>(), "search epoch");

            if epoch < self.config.resample_epochs {
                let replaced = space.resample(pool, rng);
                if replaced > 0 {
                    debug!(node = node_idx, epoch, replaced, "resampled candidates");
                }
            }
        }

        let last = self.search_loss(&ctx, node_idx, &space.delta()?)?;
        match best {
            Some((b, best_space)) if b >= last => Ok(best_space),
            _ => Ok(space),
        }
    }

    /// Pick the highest-loss discrete flip set and compute its final row.
    fn resolve(&self, episode: &mut Episode, n_perturbations: usize) -> Result<()> {
        let ctx = self.ctx();
        let node_idx = episode.node_idx;
        let budget = n_perturbations.min(episode.space.len());

        let mut top = episode.space.top_positions(budget);
        top.sort_unstable();
        let mut candidates = vec![top];
        if budget > 0 {
            for _ in 0..self.config.n_final_samples {
                let sample = episode.space.sample_discrete(budget, &mut episode.rng);
                if !candidates.contains(&sample) {
                    candidates.push(sample);
                }
            }
        }

        let mut best: Option<(f64, Vec<usize>)> = None;
        if candidates.len() == 1 {
            best = candidates.pop().map(|c| (f64::NAN, c));
        } else {
            for positions in candidates {
                let loss = self.search_loss(&ctx, node_idx, &episode.space.discrete_delta(&positions)?)?;
                if best.as_ref().map_or(true, |(b, _)| loss > *b) {
                    best = Some((loss, positions));
                }
            }
        }
        let (loss, positions) = best.ok_or(AttackError::EmptySearchSpace(node_idx))?;

        let delta = episode.space.discrete_delta(&positions)?;
        let row = self.update.final_row(&ctx, node_idx, &delta, n_perturbations)?;
        info!(
            attack = self.kind.name(),
            node = node_idx,
            n_perturbations,
            flips = positions.len(),
            loss,
            "resolved perturbation"
        );

        episode.space = SearchSpace::from_pairs(self.dataset.n_nodes(), delta.iter());
        episode.n_perturbations = n_perturbations;
        episode.resolved = Some(row);
        Ok(())
    }

    /// Log-probabilities of a victim for `node_idx` on adjacency `adj`.
    fn victim_logits(&self, model: &dyn NodeClassifier, adj: &SparseMatrix, node_idx: usize) -> Result<Vec<f64>> {
        let attributes = &self.dataset.attributes;
        let scores = match model.ppr_config() {
            Some(config) => {
                let ppr = topk_ppr_matrix(adj, &config, &[node_idx])?;
                model.forward(attributes, Propagation::Ppr(&ppr))?.into_iter().next()
            }
            None => model
                .forward(attributes, Propagation::Adjacency(adj))?
                .into_iter()
                .nth(node_idx),
        };
        let scores = scores.ok_or_else(|| {
            RgnnError::model(format!("model '{}' returned no scores for node {}", model.label(), node_idx))
        })?;
        Ok(log_softmax(&scores))
    }
}

impl<'a, U: PprUpdate> Attack for LocalAttack<'a, U> {
    fn kind(&self) -> AttackKind {
        self.kind
    }

    fn attack(&mut self, n_perturbations: usize, node_idx: usize) -> Result<()> {
        self.check_node(node_idx)?;
        let pool: Vec<usize> = self
            .candidate_pool
            .iter()
            .copied()
            .filter(|&c| c != node_idx)
            .collect();
        if pool.is_empty() && n_perturbations > 0 {
            return Err(AttackError::EmptySearchSpace(node_idx).into());
        }
        let budget = n_perturbations.min(pool.len());
        if budget < n_perturbations {
            warn!(
                node = node_idx,
                requested = n_perturbations,
                budget,
                "budget exceeds the candidate pool"
            );
        }
        info!(attack = self.kind.name(), node = node_idx, n_perturbations = budget, "attacking node");

        let mut rng = self.episode_rng(node_idx);
        let space = if budget == 0 {
            SearchSpace::from_pairs(self.dataset.n_nodes(), std::iter::empty())
        } else {
            self.search(node_idx, budget, &pool, &mut rng)?
        };
        self.episode = Some(Episode {
            node_idx,
            n_perturbations: budget,
            space,
            rng,
            resolved: None,
        });
        self.sample_final_edges(node_idx, budget)?;
        Ok(())
    }

    fn get_logits(
        &self,
        model: &dyn NodeClassifier,
        node_idx: usize,
        perturbed: Option<&SparseVector>,
    ) -> Result<Vec<f64>> {
        self.check_node(node_idx)?;
        let operator = match perturbed {
            Some(row) => row.to_matrix(),
            None => self.ppr_matrix.row(node_idx)?.to_matrix(),
        };
        let scores = model
            .forward(&self.dataset.attributes, Propagation::Ppr(&operator))?
            .into_iter()
            .next()
            .ok_or_else(|| RgnnError::model(format!("model '{}' returned no scores", model.label())))?;
        Ok(log_softmax(&scores))
    }

    fn sample_final_edges(&mut self, node_idx: usize, n_perturbations: usize) -> Result<SparseVector> {
        self.episode_for(node_idx)?;
        let mut episode = self.episode.take().ok_or(AttackError::NotAttacked(node_idx))?;
        let outcome = self.resolve(&mut episode, n_perturbations);
        let row = episode.resolved.clone();
        self.episode = Some(episode);
        outcome?;
        row.ok_or_else(|| AttackError::NotAttacked(node_idx).into())
    }

    fn perturbe_graph(&self, node_idx: usize, only_update_adj: bool) -> Result<PerturbedGraph> {
        let episode = self.episode_for(node_idx)?;
        let delta = episode.space.delta()?;
        if only_update_adj {
            let adj = materialize_perturbation(
                self.dataset.graph.adjacency(),
                node_idx,
                &delta,
                self.dataset.graph.is_undirected(),
            )?;
            Ok(PerturbedGraph::Adjacency(adj))
        } else {
            Ok(PerturbedGraph::PprRow(self.update.search_row(&self.ctx(), node_idx, &delta)?))
        }
    }

    fn evaluate_local(&self, model: &dyn NodeClassifier, node_idx: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        self.check_node(node_idx)?;
        let episode = self.episode_for(node_idx)?;
        if episode.resolved.is_none() {
            return Err(AttackError::NotAttacked(node_idx).into());
        }
        let clean = self.dataset.graph.adjacency();
        let perturbed =
            materialize_perturbation(clean, node_idx, &episode.space.delta()?, self.dataset.graph.is_undirected())?;
        let (perturbed, _) = repair_disconnected(&perturbed)?;
        let (clean, _) = repair_disconnected(clean)?;

        let logits = self.victim_logits(model, &perturbed, node_idx)?;
        let initial_logits = self.victim_logits(model, &clean, node_idx)?;
        Ok((logits, initial_logits))
    }

    fn perturbed_edges(&self) -> Vec<(usize, usize)> {
        match &self.episode {
            Some(e) if e.resolved.is_some() => e.space.columns().iter().map(|&c| (e.node_idx, c)).collect(),
            _ => Vec::new(),
        }
    }

    fn perturbation(&self) -> Option<LocalPerturbation> {
        let episode = self.episode.as_ref()?;
        let ppr_row = episode.resolved.clone()?;
        Some(LocalPerturbation {
            node_idx: episode.node_idx,
            n_perturbations: episode.n_perturbations,
            columns: episode.space.columns().to_vec(),
            ppr_row,
        })
    }

    fn set_perturbation(&mut self, perturbation: LocalPerturbation) -> Result<()> {
        let node_idx = perturbation.node_idx;
        self.check_node(node_idx)?;
        let n = self.dataset.n_nodes();
        if perturbation.ppr_row.dim() != n {
            return Err(rgnn_core::error::GraphError::ShapeMismatch {
                expected: (1, n),
                found: (1, perturbation.ppr_row.dim()),
            }
            .into());
        }
        if let Some(&bad) = perturbation.columns.iter().find(|&&c| c >= n || c == node_idx) {
            return Err(RgnnError::invalid_config(
                "columns",
                bad.to_string(),
                format!("flip columns must differ from node {} and lie below {}", node_idx, n),
            ));
        }
        debug!(node = node_idx, flips = perturbation.columns.len(), "installing cached perturbation");
        self.episode = Some(Episode {
            node_idx,
            n_perturbations: perturbation.n_perturbations,
            space: SearchSpace::from_pairs(n, perturbation.columns.iter().map(|&c| (c, 1.0))),
            rng: self.episode_rng(node_idx),
            resolved: Some(perturbation.ppr_row),
        });
        Ok(())
    }
}
