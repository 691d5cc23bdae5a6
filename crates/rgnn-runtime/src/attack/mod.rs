//! Local structure attacks on PPR-propagated node classifiers.
//!
//! An attack perturbs the edges of a single target node within an integer
//! budget. The available attacks form a closed set ([`AttackKind`]); they
//! share one generic driver ([`LocalAttack`]) and differ only in the PPR
//! update strategy ([`PprUpdate`]) injected into it.
//!
//! Episode lifecycle per target node:
//! load or compute PPR, search relaxed weights, sample the final discrete
//! edges, evaluate.

pub mod local;
pub mod search;
pub mod strategy;

pub use local::{load_or_compute_ppr, LocalAttack, PprCacheParams};
pub use search::{project_to_budget, SearchSpace};
pub use strategy::{FullRecompute, IncrementalUpdate, PprContext, PprUpdate, RecalcAtEnd};

use rgnn_core::cache::{ArtifactStore, CacheKey};
use rgnn_core::error::{AttackError, Result, RgnnError};
use rgnn_core::model::NodeClassifier;
use rgnn_core::sparse::{SparseMatrix, SparseVector};
use rgnn_core::types::Dataset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attack objective, maximised by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    /// Best non-target log-probability minus target log-probability.
    #[default]
    Margin,
    /// Negative target log-probability.
    CrossEntropy,
}

impl LossType {
    /// Loss of log-probabilities `log_probs` for true class `label`.
    pub fn evaluate(&self, log_probs: &[f64], label: usize) -> Result<f64> {
        let target = *log_probs.get(label).ok_or_else(|| {
            RgnnError::invalid_config(
                "label",
                label.to_string(),
                format!("model returned {} classes", log_probs.len()),
            )
        })?;
        match self {
            LossType::CrossEntropy => Ok(-target),
            LossType::Margin => {
                let best_other = log_probs
                    .iter()
                    .enumerate()
                    .filter(|&(c, _)| c != label)
                    .map(|(_, &v)| v)
                    .fold(f64::NEG_INFINITY, f64::max);
                Ok(best_other - target)
            }
        }
    }
}

/// How the final PPR row is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PprUpdateMode {
    /// Rank-one update of the cached PPR matrix.
    #[default]
    Incremental,
    /// Incremental during search, exact recomputation for the final row.
    RecalcAtEnd,
}

/// Teleport value used for the exact recomputation at the end of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcAlpha {
    /// `alpha + n_perturbations`, as in the reference research code.
    #[default]
    OffsetByBudget,
    /// The surrogate's own `alpha`.
    Surrogate,
}

impl RecalcAlpha {
    pub fn resolve(&self, alpha: f64, n_perturbations: usize) -> f64 {
        match self {
            RecalcAlpha::OffsetByBudget => alpha + n_perturbations as f64,
            RecalcAlpha::Surrogate => alpha,
        }
    }
}

fn default_epochs() -> usize {
    20
}

fn default_search_space_size() -> usize {
    64
}

fn default_resample_epochs() -> usize {
    10
}

fn default_lr_factor() -> f64 {
    1.0
}

fn default_probe_step() -> f64 {
    1e-2
}

fn default_final_samples() -> usize {
    20
}

/// Parameters of a local attack episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAttackConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Candidate columns optimised at once.
    #[serde(default = "default_search_space_size")]
    pub search_space_size: usize,
    /// Epochs during which near-zero candidates are resampled.
    #[serde(default = "default_resample_epochs")]
    pub resample_epochs: usize,
    #[serde(default = "default_lr_factor")]
    pub lr_factor: f64,
    /// Finite-difference step used to score candidates.
    #[serde(default = "default_probe_step")]
    pub probe_step: f64,
    #[serde(default)]
    pub loss: LossType,
    /// Bernoulli samples drawn when resolving the discrete perturbation.
    #[serde(default = "default_final_samples")]
    pub n_final_samples: usize,
    #[serde(default)]
    pub seed: u64,
    /// Restrict PPR rows and candidate columns to the attackable nodes.
    #[serde(default)]
    pub attack_labeled_nodes_only: bool,
    #[serde(default)]
    pub ppr_update: PprUpdateMode,
    #[serde(default)]
    pub recalc_alpha: RecalcAlpha,
}

impl Default for LocalAttackConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            search_space_size: default_search_space_size(),
            resample_epochs: default_resample_epochs(),
            lr_factor: default_lr_factor(),
            probe_step: default_probe_step(),
            loss: LossType::default(),
            n_final_samples: default_final_samples(),
            seed: 0,
            attack_labeled_nodes_only: false,
            ppr_update: PprUpdateMode::default(),
            recalc_alpha: RecalcAlpha::default(),
        }
    }
}

impl LocalAttackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.search_space_size == 0 {
            return Err(RgnnError::invalid_config("search_space_size", "0", "must be at least 1"));
        }
        if !(self.lr_factor.is_finite() && self.lr_factor > 0.0) {
            return Err(RgnnError::invalid_config(
                "lr_factor",
                self.lr_factor.to_string(),
                "must be positive and finite",
            ));
        }
        if !(self.probe_step > 0.0 && self.probe_step <= 0.5) {
            return Err(RgnnError::invalid_config(
                "probe_step",
                self.probe_step.to_string(),
                "must lie in (0, 0.5]",
            ));
        }
        if self.resample_epochs > self.epochs {
            return Err(AttackError::IncompatibleParameters(format!(
                "resample_epochs ({}) exceeds epochs ({})",
                self.resample_epochs, self.epochs
            ))
            .into());
        }
        Ok(())
    }

    /// Cache-key view of the parameters.
    pub fn cache_key(&self) -> Result<CacheKey> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(fields) => Ok(fields
                .into_iter()
                .fold(CacheKey::new(), |key, (name, value)| key.with(name, value))),
            other => Err(RgnnError::invalid_config(
                "attack_params",
                other.to_string(),
                "must serialize to a JSON object",
            )),
        }
    }
}

/// Result of perturbing a graph with the current search-space weights.
#[derive(Debug, Clone, PartialEq)]
pub enum PerturbedGraph {
    /// Updated PPR row of the target node.
    PprRow(SparseVector),
    /// Fully materialized perturbed adjacency.
    Adjacency(SparseMatrix),
}

/// A resolved discrete perturbation, storable and replayable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPerturbation {
    pub node_idx: usize,
    pub n_perturbations: usize,
    /// Flipped columns of the target row, sorted.
    pub columns: Vec<usize>,
    /// PPR row the surrogate saw after the perturbation.
    pub ppr_row: SparseVector,
}

/// The closed set of available attacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackKind {
    /// Batched local PRBCD over a precomputed top-k PPR matrix.
    #[serde(rename = "LocalBatchedPRBCD")]
    LocalBatchedPrbcd,
    /// Local PRBCD that recomputes PPR from the perturbed adjacency.
    #[serde(rename = "LocalPRBCD")]
    LocalPrbcd,
}

impl AttackKind {
    pub const ALL: [AttackKind; 2] = [AttackKind::LocalBatchedPrbcd, AttackKind::LocalPrbcd];

    pub fn name(&self) -> &'static str {
        match self {
            AttackKind::LocalBatchedPrbcd => "LocalBatchedPRBCD",
            AttackKind::LocalPrbcd => "LocalPRBCD",
        }
    }

    /// Instantiate the attack on `dataset` against `surrogate`.
    pub fn build<'a>(
        &self,
        dataset: &'a Dataset,
        surrogate: &'a dyn NodeClassifier,
        idx_attack: &[usize],
        config: LocalAttackConfig,
        cache: Option<(&mut dyn ArtifactStore, &PprCacheParams)>,
    ) -> Result<Box<dyn Attack + 'a>> {
        let kind = *self;
        let attack: Box<dyn Attack + 'a> = match (kind, config.ppr_update) {
            (AttackKind::LocalBatchedPrbcd, PprUpdateMode::Incremental) => Box::new(LocalAttack::new(
                kind,
                dataset,
                surrogate,
                idx_attack,
                config,
                IncrementalUpdate,
                cache,
            )?),
            (AttackKind::LocalBatchedPrbcd, PprUpdateMode::RecalcAtEnd) => {
                let update = RecalcAtEnd::new(config.recalc_alpha);
                Box::new(LocalAttack::new(kind, dataset, surrogate, idx_attack, config, update, cache)?)
            }
            (AttackKind::LocalPrbcd, PprUpdateMode::Incremental) => Box::new(LocalAttack::new(
                kind,
                dataset,
                surrogate,
                idx_attack,
                config,
                FullRecompute,
                cache,
            )?),
            (AttackKind::LocalPrbcd, PprUpdateMode::RecalcAtEnd) => {
                return Err(AttackError::IncompatibleParameters(
                    "LocalPRBCD always recomputes PPR; ppr_update = recalc_at_end only applies to LocalBatchedPRBCD"
                        .to_string(),
                )
                .into())
            }
        };
        Ok(attack)
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackKind {
    type Err = RgnnError;

    fn from_str(s: &str) -> Result<Self> {
        AttackKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = AttackKind::ALL.iter().map(|k| k.name()).collect();
                RgnnError::invalid_config("attack", s, format!("expected one of {}", known.join(", ")))
            })
    }
}

/// Capability interface shared by every local attack.
pub trait Attack {
    fn kind(&self) -> AttackKind;

    /// Run an episode against `node_idx` with budget `n_perturbations`.
    fn attack(&mut self, n_perturbations: usize, node_idx: usize) -> Result<()>;

    /// Log-probabilities of `model` for `node_idx`. Without `perturbed`, the
    /// cached PPR row of the node is used.
    fn get_logits(
        &self,
        model: &dyn NodeClassifier,
        node_idx: usize,
        perturbed: Option<&SparseVector>,
    ) -> Result<Vec<f64>>;

    /// Resolve the relaxed weights into exactly `n_perturbations` flips and
    /// return the resulting PPR row.
    fn sample_final_edges(&mut self, node_idx: usize, n_perturbations: usize) -> Result<SparseVector>;

    /// Perturb with the current weights.
    fn perturbe_graph(&self, node_idx: usize, only_update_adj: bool) -> Result<PerturbedGraph>;

    /// `(logits, initial_logits)` of a victim model on the perturbed and the
    /// clean graph.
    fn evaluate_local(&self, model: &dyn NodeClassifier, node_idx: usize) -> Result<(Vec<f64>, Vec<f64>)>;

    /// Resolved `(node, column)` flips of the last episode.
    fn perturbed_edges(&self) -> Vec<(usize, usize)>;

    /// The resolved perturbation of the last episode, if any.
    fn perturbation(&self) -> Option<LocalPerturbation>;

    /// Install a previously resolved perturbation instead of attacking.
    fn set_perturbation(&mut self, perturbation: LocalPerturbation) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_and_cross_entropy() {
        let lp = [-0.1, -2.5, -3.0];
        assert!((LossType::Margin.evaluate(&lp, 0).unwrap() - (-2.4)).abs() < 1e-12);
        assert!((LossType::Margin.evaluate(&lp, 1).unwrap() - 2.4).abs() < 1e-12);
        assert_eq!(LossType::CrossEntropy.evaluate(&lp, 2).unwrap(), 3.0);
        assert!(LossType::Margin.evaluate(&lp, 3).is_err());
    }

    #[test]
    fn recalc_alpha_keeps_budget_offset() {
        assert_eq!(RecalcAlpha::OffsetByBudget.resolve(0.1, 2), 2.1);
        assert_eq!(RecalcAlpha::Surrogate.resolve(0.1, 2), 0.1);
    }

    #[test]
    fn attack_names_parse() {
        assert_eq!("LocalBatchedPRBCD".parse::<AttackKind>().unwrap(), AttackKind::LocalBatchedPrbcd);
        assert_eq!("localprbcd".parse::<AttackKind>().unwrap(), AttackKind::LocalPrbcd);
        assert!("Nettack".parse::<AttackKind>().is_err());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: LocalAttackConfig = serde_json::from_str(r#"{"epochs": 5, "resample_epochs": 2}"#).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.search_space_size, 64);
        assert_eq!(config.recalc_alpha, RecalcAlpha::OffsetByBudget);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn resample_beyond_epochs_is_incompatible() {
        let config = LocalAttackConfig {
            epochs: 2,
            resample_epochs: 3,
            ..LocalAttackConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RgnnError::Attack(AttackError::IncompatibleParameters(_)))
        ));
    }

    #[test]
    fn cache_key_lists_every_parameter() {
        let key = LocalAttackConfig::default().cache_key().unwrap();
        assert_eq!(key.get("epochs"), Some(&serde_json::Value::from(20)));
        assert_eq!(key.get("loss"), Some(&serde_json::Value::from("margin")));
    }
}
