//! Local attack experiments over nodes and budgets.
//!
//! The driver attacks every selected node once per epsilon, evaluates each
//! victim on the resulting graph and records one [`UnitOutcome`] per
//! (node, epsilon, model). Failures are recorded, logged and skipped; the
//! batch only fails when nothing succeeded.

use crate::attack::{Attack, AttackKind, LocalAttackConfig, LocalPerturbation, PprCacheParams};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rgnn_core::cache::{ArtifactStore, ArtifactStoreExt, CacheKey};
use rgnn_core::error::{AttackError, ConfigError, Result, RgnnError};
use rgnn_core::model::{classification_statistics, log_softmax, ClassificationStatistics, NodeClassifier, Propagation};
use rgnn_core::ppr::topk_ppr_matrix;
use rgnn_core::types::{Dataset, Graph};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Reject epsilon lists that are unsorted, repeated, negative or non-finite.
pub fn validate_epsilons(epsilons: &[f64]) -> Result<()> {
    if let Some(&bad) = epsilons.iter().find(|e| !e.is_finite() || **e < 0.0) {
        return Err(ConfigError::InvalidValue {
            field: "epsilons".into(),
            value: bad.to_string(),
            reason: "every epsilon must be finite and non-negative".into(),
        }
        .into());
    }
    if let Some(pair) = epsilons.windows(2).find(|w| w[0] >= w[1]) {
        return Err(ConfigError::InvalidValue {
            field: "epsilons".into(),
            value: format!("{:?}", epsilons),
            reason: format!("must be strictly increasing ({} is followed by {})", pair[0], pair[1]),
        }
        .into());
    }
    Ok(())
}

/// Round to the nearest integer, ties to even. Negative inputs give 0.
pub fn round_half_even(x: f64) -> usize {
    let rounded = x.round_ties_even();
    if rounded.is_finite() && rounded > 0.0 {
        rounded as usize
    } else {
        0
    }
}

/// Per-node budget: `round(epsilon * degree)`.
pub fn local_budget(epsilon: f64, degree: f64) -> usize {
    round_half_even(epsilon * degree)
}

/// Whole-graph budget: `round(epsilon * m)` over logical edges.
pub fn global_budget(epsilon: f64, graph: &Graph) -> usize {
    round_half_even(epsilon * graph.edge_count() as f64)
}

fn default_topk() -> usize {
    10
}

fn default_min_degree() -> f64 {
    2.0
}

/// How attack targets are picked when none are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSelection {
    /// Nodes taken from each group (high margin, low margin, random).
    #[serde(default = "default_topk")]
    pub topk: usize,
    #[serde(default = "default_min_degree")]
    pub min_degree: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for NodeSelection {
    fn default() -> Self {
        Self {
            topk: default_topk(),
            min_degree: default_min_degree(),
            seed: 0,
        }
    }
}

/// Clean log-probabilities of `model` for `nodes`.
fn clean_log_probs(dataset: &Dataset, model: &dyn NodeClassifier, nodes: &[usize]) -> Result<Vec<Vec<f64>>> {
    let adjacency = dataset.graph.adjacency();
    let scores = match model.ppr_config() {
        Some(config) => {
            let ppr = topk_ppr_matrix(adjacency, &config, nodes)?;
            model.forward(&dataset.attributes, Propagation::Ppr(&ppr))?
        }
        None => {
            let all = model.forward(&dataset.attributes, Propagation::Adjacency(adjacency))?;
            nodes
                .iter()
                .map(|&i| {
                    all.get(i)
                        .cloned()
                        .ok_or_else(|| RgnnError::model(format!("no scores for node {}", i)))
                })
                .collect::<Result<_>>()?
        }
    };
    if scores.len() != nodes.len() {
        return Err(RgnnError::model(format!(
            "model '{}' returned {} rows for {} nodes",
            model.label(),
            scores.len(),
            nodes.len()
        )));
    }
    Ok(scores.iter().map(|s| log_softmax(s)).collect())
}

/// Pick attack targets among `candidates`: the `topk` highest-margin, the
/// `topk` lowest-margin and `topk` random remaining nodes of degree at least
/// `min_degree`. Returned in selection order.
pub fn select_attack_nodes(
    dataset: &Dataset,
    surrogate: &dyn NodeClassifier,
    candidates: &[usize],
    selection: &NodeSelection,
) -> Result<Vec<usize>> {
    let eligible: Vec<usize> = candidates
        .iter()
        .copied()
        .map(|i| Ok((i, dataset.graph.degree(i)?)))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|&(_, deg)| deg >= selection.min_degree)
        .map(|(i, _)| i)
        .collect();
    if eligible.is_empty() {
        warn!(min_degree = selection.min_degree, "no candidate node satisfies the degree filter");
        return Ok(Vec::new());
    }

    let log_probs = clean_log_probs(dataset, surrogate, &eligible)?;
    let mut by_margin: Vec<(usize, f64)> = eligible
        .iter()
        .zip(&log_probs)
        .map(|(&i, lp)| Ok((i, classification_statistics(lp, dataset.labels[i])?.margin)))
        .collect::<Result<_>>()?;
    by_margin.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let k = selection.topk;
    let mut chosen: Vec<usize> = by_margin.iter().take(k).map(|&(i, _)| i).collect();
    for &(i, _) in by_margin.iter().rev().take(k) {
        if !chosen.contains(&i) {
            chosen.push(i);
        }
    }
    let mut rest: Vec<usize> = eligible.iter().copied().filter(|i| !chosen.contains(i)).collect();
    rest.sort_unstable();
    let mut rng = ChaCha8Rng::seed_from_u64(selection.seed);
    chosen.extend(rest.choose_multiple(&mut rng, k.min(rest.len())).copied());

    info!(selected = chosen.len(), eligible = eligible.len(), "selected attack nodes");
    Ok(chosen)
}

/// Query for stored models of `dataset`; `label = None` matches any label.
pub fn model_params(dataset: &Dataset, label: Option<&str>, seed: u64) -> CacheKey {
    let options = &dataset.options;
    CacheKey::new()
        .with("dataset", dataset.name.as_str())
        .with("binary_attr", options.binary_attr)
        .with("normalize", options.normalize)
        .with("normalize_attr", options.normalize_attr())
        .with("make_undirected", options.make_undirected)
        .with("make_unweighted", options.make_unweighted)
        .with("label", label.map_or(serde_json::Value::Null, serde_json::Value::from))
        .with("seed", seed)
}

/// A model under evaluation.
pub struct Victim<'m> {
    pub label: String,
    pub model: &'m dyn NodeClassifier,
}

/// Settings of a local attack experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalExperimentConfig {
    pub attack: AttackKind,
    #[serde(default)]
    pub attack_params: LocalAttackConfig,
    pub epsilons: Vec<f64>,
    /// Explicit targets; selected from the test split when absent.
    #[serde(default)]
    pub nodes: Option<Vec<usize>>,
    #[serde(default)]
    pub node_selection: NodeSelection,
    #[serde(default)]
    pub seed: u64,
    /// Label of the surrogate, recorded in perturbation cache keys.
    pub surrogate_label: String,
    /// Storage type of cached PPR matrices; caching is off when absent.
    #[serde(default)]
    pub ppr_storage_type: Option<String>,
    /// Storage type of cached perturbations; caching is off when absent.
    #[serde(default)]
    pub pert_storage_type: Option<String>,
}

impl LocalExperimentConfig {
    /// Key shared by every perturbation of this experiment.
    pub fn pert_params(&self, dataset: &Dataset) -> Result<CacheKey> {
        let options = &dataset.options;
        Ok(CacheKey::new()
            .with("dataset", dataset.name.as_str())
            .with("binary_attr", options.binary_attr)
            .with("normalize", options.normalize)
            .with("normalize_attr", options.normalize_attr())
            .with("make_undirected", options.make_undirected)
            .with("make_unweighted", options.make_unweighted)
            .with("seed", self.seed)
            .with("attack", self.attack.name())
            .with("surrogate_model", self.surrogate_label.as_str())
            .with_key("attack_params", &self.attack_params.cache_key()?))
    }
}

/// One evaluated (node, epsilon, model) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalResult {
    pub label: String,
    pub epsilon: f64,
    pub n_perturbations: usize,
    pub degree: f64,
    pub logits: Vec<f64>,
    pub initial_logits: Vec<f64>,
    pub target: usize,
    pub node_id: usize,
    pub perturbed_edges: Vec<(usize, usize)>,
    pub statistics: ClassificationStatistics,
    pub initial_statistics: ClassificationStatistics,
}

/// Where a unit of work failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Instantiate,
    Attack,
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub stage: Stage,
    pub attack: String,
    pub model: Option<String>,
    pub epsilon: f64,
    pub node: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Ok(LocalResult),
    Failed(UnitFailure),
}

/// Outcomes of a batch, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, outcome: UnitOutcome) {
        if let UnitOutcome::Failed(failure) = &outcome {
            error!(
                stage = ?failure.stage,
                attack = %failure.attack,
                model = failure.model.as_deref().unwrap_or("-"),
                epsilon = failure.epsilon,
                node = failure.node,
                reason = %failure.reason,
                "unit failed"
            );
        }
        self.outcomes.push(outcome);
    }

    pub fn results(&self) -> impl Iterator<Item = &LocalResult> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Ok(r) => Some(r),
            UnitOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Failed(f) => Some(f),
            UnitOutcome::Ok(_) => None,
        })
    }

    /// Successful results; an error if there are none.
    pub fn into_results(self) -> Result<Vec<LocalResult>> {
        let failures = self.failures().count();
        let results: Vec<LocalResult> = self
            .outcomes
            .into_iter()
            .filter_map(|o| match o {
                UnitOutcome::Ok(r) => Some(r),
                UnitOutcome::Failed(_) => None,
            })
            .collect();
        if results.is_empty() {
            return Err(AttackError::NoResults { failures }.into());
        }
        Ok(results)
    }
}

/// Run a local attack experiment.
///
/// `store` enables PPR and perturbation caching for the storage types set in
/// `config`.
pub fn run_local_experiment(
    dataset: &Dataset,
    surrogate: &dyn NodeClassifier,
    victims: &[Victim<'_>],
    config: &LocalExperimentConfig,
    mut store: Option<&mut dyn ArtifactStore>,
) -> Result<BatchReport> {
    validate_epsilons(&config.epsilons)?;
    config.attack_params.validate()?;
    if victims.is_empty() {
        return Err(RgnnError::missing("victim models"));
    }

    let nodes = match &config.nodes {
        Some(nodes) => nodes.clone(),
        None => select_attack_nodes(dataset, surrogate, &dataset.split.test, &config.node_selection)?,
    };
    info!(
        attack = config.attack.name(),
        nodes = nodes.len(),
        epsilons = ?config.epsilons,
        victims = victims.len(),
        "starting local attack experiment"
    );

    let mut report = BatchReport::default();
    let attack_name = config.attack.name().to_string();
    let fail = |stage, model: Option<&str>, epsilon, node, reason: String| {
        UnitOutcome::Failed(UnitFailure {
            stage,
            attack: attack_name.clone(),
            model: model.map(str::to_string),
            epsilon,
            node,
            reason,
        })
    };

    let ppr_params = config
        .ppr_storage_type
        .as_ref()
        .map(|storage_type| PprCacheParams::for_dataset(dataset, storage_type.as_str()));
    let ppr_cache = match (reborrow(&mut store), ppr_params.as_ref()) {
        (Some(s), Some(p)) => Some((s, p)),
        _ => None,
    };
    let mut adversary = match config.attack.build(
        dataset,
        surrogate,
        &dataset.split.test,
        config.attack_params.clone(),
        ppr_cache,
    ) {
        Ok(adversary) => adversary,
        Err(e) => {
            for &node in &nodes {
                for &epsilon in &config.epsilons {
                    report.push(fail(Stage::Instantiate, None, epsilon, node, e.to_string()));
                }
            }
            return Ok(report);
        }
    };

    let pert_params = config.pert_params(dataset)?;
    for &node in &nodes {
        let degree = match dataset.graph.degree(node) {
            Ok(degree) => degree,
            Err(e) => {
                for &epsilon in &config.epsilons {
                    report.push(fail(Stage::Attack, None, epsilon, node, e.to_string()));
                }
                continue;
            }
        };

        for &epsilon in &config.epsilons {
            let n_perturbations = local_budget(epsilon, degree);
            let pert_key = pert_params.merged(&CacheKey::new().with("epsilon", epsilon).with("node", node));

            let attacked = attack_or_replay(
                adversary.as_mut(),
                reborrow(&mut store),
                config.pert_storage_type.as_deref(),
                &pert_key,
                node,
                n_perturbations,
            );
            if let Err(e) = attacked {
                report.push(fail(Stage::Attack, None, epsilon, node, e.to_string()));
                continue;
            }

            for victim in victims {
                match evaluate(adversary.as_ref(), victim, dataset, node) {
                    Ok((logits, initial_logits, statistics, initial_statistics)) => {
                        let perturbed_edges = adversary.perturbed_edges();
                        info!(
                            model = %victim.label,
                            attack = %attack_name,
                            node,
                            n_perturbations,
                            edges = ?perturbed_edges,
                            "evaluated perturbed node"
                        );
                        report.push(UnitOutcome::Ok(LocalResult {
                            label: victim.label.clone(),
                            epsilon,
                            n_perturbations,
                            degree,
                            logits,
                            initial_logits,
                            target: dataset.labels[node],
                            node_id: node,
                            perturbed_edges,
                            statistics,
                            initial_statistics,
                        }));
                    }
                    Err(e) => report.push(fail(Stage::Evaluate, Some(&victim.label), epsilon, node, e.to_string())),
                }
            }
        }
    }
    Ok(report)
}

fn reborrow<'s>(store: &'s mut Option<&mut dyn ArtifactStore>) -> Option<&'s mut dyn ArtifactStore> {
    match store {
        Some(s) => Some(&mut **s),
        None => None,
    }
}

/// Install a cached perturbation for `node`, or attack and cache the result.
fn attack_or_replay(
    adversary: &mut dyn Attack,
    store: Option<&mut dyn ArtifactStore>,
    storage_type: Option<&str>,
    key: &CacheKey,
    node: usize,
    n_perturbations: usize,
) -> Result<()> {
    let Some((store, storage_type)) = store.zip(storage_type) else {
        return adversary.attack(n_perturbations, node);
    };

    match store.load_artifact::<LocalPerturbation>(storage_type, key) {
        Ok(Some(cached)) => {
            info!(node, n_perturbations, "found cached perturbation");
            return adversary.set_perturbation(cached);
        }
        Ok(None) => info!(node, n_perturbations, "no cached perturbation, attacking"),
        Err(e) => warn!(node, error = %e, "perturbation cache lookup failed, attacking"),
    }

    adversary.attack(n_perturbations, node)?;
    if let Some(perturbation) = adversary.perturbation() {
        if let Err(e) = store.save_artifact(storage_type, key, &perturbation, false) {
            warn!(node, error = %e, "failed to cache perturbation");
        }
    }
    Ok(())
}

type Evaluation = (Vec<f64>, Vec<f64>, ClassificationStatistics, ClassificationStatistics);

fn evaluate(adversary: &dyn Attack, victim: &Victim<'_>, dataset: &Dataset, node: usize) -> Result<Evaluation> {
    let (logits, initial_logits) = adversary.evaluate_local(victim.model, node)?;
    let target = dataset.labels[node];
    let statistics = classification_statistics(&logits, target)?;
    let initial_statistics = classification_statistics(&initial_logits, target)?;
    Ok((logits, initial_logits, statistics, initial_statistics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsilons_must_be_sorted_unique_and_non_negative() {
        assert!(validate_epsilons(&[]).is_ok());
        assert!(validate_epsilons(&[0.0, 0.5, 1.0]).is_ok());
        assert!(validate_epsilons(&[0.5, 0.25]).is_err());
        assert!(validate_epsilons(&[0.5, 0.5]).is_err());
        assert!(validate_epsilons(&[-0.1, 0.5]).is_err());
        assert!(validate_epsilons(&[0.1, f64::NAN]).is_err());
    }

    #[test]
    fn budgets_round_half_to_even() {
        assert_eq!(local_budget(0.5, 4.0), 2);
        assert_eq!(local_budget(0.5, 5.0), 2);
        assert_eq!(local_budget(0.5, 7.0), 4);
        assert_eq!(local_budget(0.25, 10.0), 2);
        assert_eq!(local_budget(0.0, 10.0), 0);
        assert_eq!(round_half_even(-3.0), 0);
    }

    #[test]
    fn report_fails_only_without_results() {
        let failure = UnitFailure {
            stage: Stage::Attack,
            attack: "LocalBatchedPRBCD".into(),
            model: None,
            epsilon: 0.5,
            node: 3,
            reason: "diverged".into(),
        };
        let mut report = BatchReport::default();
        report.push(UnitOutcome::Failed(failure));
        assert!(matches!(
            report.clone().into_results(),
            Err(RgnnError::Attack(AttackError::NoResults { failures: 1 }))
        ));

        let stats = ClassificationStatistics {
            logit_target: -0.1,
            logit_best_non_target: -2.0,
            confidence_target: 0.9,
            confidence_non_target: 0.1,
            margin: 0.8,
        };
        report.push(UnitOutcome::Ok(LocalResult {
            label: "Linear PPR".into(),
            epsilon: 0.5,
            n_perturbations: 1,
            degree: 2.0,
            logits: vec![-0.1, -2.0],
            initial_logits: vec![-0.1, -2.0],
            target: 0,
            node_id: 4,
            perturbed_edges: vec![(4, 1)],
            statistics: stats,
            initial_statistics: stats,
        }));
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.into_results().unwrap().len(), 1);
    }

    fn tiny_dataset(normalize: bool) -> Dataset {
        let file = rgnn_core::types::DatasetFile {
            n_nodes: 3,
            edges: vec![rgnn_core::types::EdgeRecord {
                source: 0,
                target: 1,
                weight: 1.0,
            }],
            features: vec![vec![1.0, 1.0], vec![2.0, 0.0], vec![0.0, 3.0]],
            labels: vec![0, 1, 1],
            split: None,
        };
        let options = rgnn_core::types::PrepOptions {
            normalize,
            ..Default::default()
        };
        Dataset::prepare("tiny", file, options, 0).unwrap()
    }

    #[test]
    fn keys_record_attribute_normalization() {
        let raw = tiny_dataset(false);
        let normalized = tiny_dataset(true);

        let query = model_params(&raw, Some("GCN"), 0);
        assert_eq!(query.get("normalize_attr"), Some(&serde_json::Value::from("none")));
        assert_ne!(query, model_params(&normalized, Some("GCN"), 0));

        let config = LocalExperimentConfig {
            attack: AttackKind::LocalBatchedPrbcd,
            attack_params: LocalAttackConfig::default(),
            epsilons: vec![0.5],
            nodes: None,
            node_selection: NodeSelection::default(),
            seed: 0,
            surrogate_label: "Linear PPR".into(),
            ppr_storage_type: None,
            pert_storage_type: None,
        };
        let pert = config.pert_params(&normalized).unwrap();
        assert_eq!(pert.get("normalize_attr"), Some(&serde_json::Value::from("l1")));
        assert_ne!(pert, config.pert_params(&raw).unwrap());
    }

    #[test]
    fn outcomes_serialize_with_status_tag() {
        let outcome = UnitOutcome::Failed(UnitFailure {
            stage: Stage::Evaluate,
            attack: "LocalPRBCD".into(),
            model: Some("GCN".into()),
            epsilon: 1.0,
            node: 0,
            reason: "forward failed".into(),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "evaluate");
    }
}
