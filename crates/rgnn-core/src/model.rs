//! Node classifier contract used by attacks and evaluation.
//!
//! Models are external collaborators: training and architectures live
//! elsewhere. Attacks only need class scores for a propagation operator.
//! [`LinearPprModel`] is a small PPR-propagated linear classifier that
//! satisfies the contract and can be stored as a JSON artifact.

use crate::error::{Result, RgnnError};
use crate::ppr::{topk_ppr_matrix, PprConfig};
use crate::sparse::SparseMatrix;
use crate::types::Attributes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Propagation operator handed to a model.
#[derive(Debug, Clone, Copy)]
pub enum Propagation<'a> {
    /// Full adjacency; the model returns scores for every node.
    Adjacency(&'a SparseMatrix),
    /// PPR rows; the model returns scores for every row.
    Ppr(&'a SparseMatrix),
}

/// A node classifier.
pub trait NodeClassifier {
    /// Human-readable model label (e.g. "Linear PPR").
    fn label(&self) -> &str;

    fn n_classes(&self) -> usize;

    /// PPR hyperparameters for PPR-based models.
    fn ppr_config(&self) -> Option<PprConfig>;

    /// Unnormalized class scores, one vector per output row.
    fn forward(&self, attributes: &Attributes, propagation: Propagation<'_>) -> Result<Vec<Vec<f64>>>;
}

/// Numerically stable log-softmax.
pub fn log_softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return scores.to_vec();
    }
    let log_sum = scores.iter().map(|s| (s - max).exp()).sum::<f64>().ln() + max;
    scores.iter().map(|s| s - log_sum).collect()
}

/// Per-node classification statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStatistics {
    pub logit_target: f64,
    pub logit_best_non_target: f64,
    pub confidence_target: f64,
    pub confidence_non_target: f64,
    /// `confidence_target - confidence_non_target`; negative means misclassified.
    pub margin: f64,
}

/// Statistics of log-probabilities `log_probs` against the true `label`.
pub fn classification_statistics(log_probs: &[f64], label: usize) -> Result<ClassificationStatistics> {
    if label >= log_probs.len() || log_probs.len() < 2 {
        return Err(RgnnError::invalid_config(
            "label",
            label.to_string(),
            format!("needs a label below {} and at least two classes", log_probs.len()),
        ));
    }
    let logit_target = log_probs[label];
    let logit_best_non_target = log_probs
        .iter()
        .enumerate()
        .filter(|&(c, _)| c != label)
        .map(|(_, &v)| v)
        .fold(f64::NEG_INFINITY, f64::max);
    let confidence_target = logit_target.exp();
    let confidence_non_target = logit_best_non_target.exp();
    Ok(ClassificationStatistics {
        logit_target,
        logit_best_non_target,
        confidence_target,
        confidence_non_target,
        margin: confidence_target - confidence_non_target,
    })
}

/// `scores_i = sum_j ppr[i, j] * (x_j W) + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPprModel {
    pub label: String,
    /// `n_features x n_classes`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub ppr: PprConfig,
}

impl LinearPprModel {
    pub fn new(label: impl Into<String>, weights: Vec<Vec<f64>>, bias: Vec<f64>, ppr: PprConfig) -> Result<Self> {
        let model = Self {
            label: label.into(),
            weights,
            bias,
            ppr,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        self.ppr.validate()?;
        let n_classes = self.bias.len();
        if n_classes == 0 {
            return Err(RgnnError::missing("bias"));
        }
        if let Some(row) = self.weights.iter().position(|w| w.len() != n_classes) {
            return Err(RgnnError::invalid_config(
                "weights",
                format!("row {}", row),
                format!("expected {} classes", n_classes),
            ));
        }
        Ok(())
    }

    fn project(&self, attributes: &Attributes, node: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.bias.len()];
        for (f, x) in attributes.row_entries(node) {
            if let Some(w) = self.weights.get(f) {
                for (o, wc) in out.iter_mut().zip(w) {
                    *o += x * wc;
                }
            }
        }
        out
    }

    fn propagate(&self, attributes: &Attributes, ppr: &SparseMatrix) -> Vec<Vec<f64>> {
        let mut projected: HashMap<usize, Vec<f64>> = HashMap::new();
        (0..ppr.n_rows())
            .map(|i| {
                let mut scores = self.bias.clone();
                for (j, pj) in ppr.row_iter(i) {
                    let h = projected
                        .entry(j)
                        .or_insert_with(|| self.project(attributes, j));
                    for (s, hc) in scores.iter_mut().zip(h.iter()) {
                        *s += pj * hc;
                    }
                }
                scores
            })
            .collect()
    }
}

impl NodeClassifier for LinearPprModel {
    fn label(&self) -> &str {
        &self.label
    }

    fn n_classes(&self) -> usize {
        self.bias.len()
    }

    fn ppr_config(&self) -> Option<PprConfig> {
        Some(self.ppr)
    }

    fn forward(&self, attributes: &Attributes, propagation: Propagation<'_>) -> Result<Vec<Vec<f64>>> {
        if attributes.n_features() > self.weights.len() {
            return Err(RgnnError::model(format!(
                "model '{}' expects {} features, got {}",
                self.label,
                self.weights.len(),
                attributes.n_features()
            )));
        }
        match propagation {
            Propagation::Ppr(ppr) => Ok(self.propagate(attributes, ppr)),
            Propagation::Adjacency(adj) => {
                let nodes: Vec<usize> = (0..adj.n_rows()).collect();
                let ppr = topk_ppr_matrix(adj, &self.ppr, &nodes)?;
                Ok(self.propagate(attributes, &ppr))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppr::PprNormalization;
    use crate::sparse::SparseVector;

    #[test]
    fn log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f64 = lp.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(lp[2] > lp[1] && lp[1] > lp[0]);
    }

    #[test]
    fn statistics_report_margin() {
        let lp = log_softmax(&[0.0, 2.0, 1.0]);
        let stats = classification_statistics(&lp, 1).unwrap();
        assert_eq!(stats.logit_target, lp[1]);
        assert_eq!(stats.logit_best_non_target, lp[2]);
        assert!(stats.margin > 0.0);
        assert!(classification_statistics(&lp, 3).is_err());
    }

    #[test]
    fn linear_model_propagates_ppr_rows() {
        let model = LinearPprModel::new(
            "Linear PPR",
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![0.0, 0.0],
            PprConfig::new(0.1, 1e-4, 8, PprNormalization::Row),
        )
        .unwrap();
        let attrs = Attributes::Dense(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let row = SparseVector::from_pairs(2, [(0, 0.25), (1, 0.75)]).unwrap().to_matrix();
        let scores = model.forward(&attrs, Propagation::Ppr(&row)).unwrap();
        assert_eq!(scores, vec![vec![0.25, 0.75]]);
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let result = LinearPprModel::new(
            "broken",
            vec![vec![1.0], vec![0.0, 1.0]],
            vec![0.0, 0.0],
            PprConfig::default(),
        );
        assert!(result.is_err());
    }
}
