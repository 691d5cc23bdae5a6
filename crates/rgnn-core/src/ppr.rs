//! Sparse Personalized PageRank engine.
//!
//! Rows are computed with forward push (Andersen et al. 2006) and truncated to
//! the `topk` largest scores. For a source `s` the push approximates
//!
//! ```text
//! ppr_s = alpha * e_s (I - (1 - alpha) D^-1 A)^-1
//! ```
//!
//! so the exact matrix is `alpha * M^-1` with `M = I - (1 - alpha) D^-1 A`.
//! Changing one row of `A` is a rank-one change of `M`, which is what
//! [`ppr_update_row`] exploits through the Sherman-Morrison identity.

use crate::error::{ConfigError, GraphError, PprError, Result, RgnnError};
use crate::sparse::{SparseAccumulator, SparseMatrix, SparseVector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Weight of the placeholder self-loop given to nodes without any edge.
pub const DISCONNECTED_EDGE_WEIGHT: f64 = 1e-9;

const DEGREE_FLOOR: f64 = 1e-12;

/// How raw PPR scores are rescaled after the push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PprNormalization {
    /// Raw scores (each row is a distribution over destinations).
    Row,
    /// `sqrt(deg_src) * p / sqrt(deg_dst)`.
    Sym,
    /// `deg_src * p / deg_dst`.
    Col,
}

impl fmt::Display for PprNormalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PprNormalization::Row => write!(f, "row"),
            PprNormalization::Sym => write!(f, "sym"),
            PprNormalization::Col => write!(f, "col"),
        }
    }
}

impl FromStr for PprNormalization {
    type Err = RgnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "row" => Ok(PprNormalization::Row),
            "sym" => Ok(PprNormalization::Sym),
            "col" => Ok(PprNormalization::Col),
            _ => Err(RgnnError::invalid_config("ppr_normalization", s, "expected row, sym or col")),
        }
    }
}

/// PPR hyperparameters, usually taken from the surrogate model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PprConfig {
    /// Teleport probability.
    pub alpha: f64,
    /// Push tolerance.
    pub eps: f64,
    /// Entries kept per row.
    pub topk: usize,
    pub normalization: PprNormalization,
}

impl PprConfig {
    pub fn new(alpha: f64, eps: f64, topk: usize, normalization: PprNormalization) -> Self {
        Self {
            alpha,
            eps,
            topk,
            normalization,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "alpha".into(),
                min: 0.0,
                max: 1.0,
                value: self.alpha,
            }
            .into());
        }
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(RgnnError::invalid_config(
                "eps",
                self.eps.to_string(),
                "push tolerance must be positive",
            ));
        }
        if self.topk == 0 {
            return Err(RgnnError::invalid_config(
                "topk",
                "0",
                "at least one entry per row is required",
            ));
        }
        Ok(())
    }
}

impl Default for PprConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            eps: 1e-4,
            topk: 64,
            normalization: PprNormalization::Row,
        }
    }
}

/// Top-k PPR rows for the source nodes `idx`, shape `(idx.len(), n)`.
pub fn topk_ppr_matrix(adj: &SparseMatrix, config: &PprConfig, idx: &[usize]) -> Result<SparseMatrix> {
    config.validate()?;
    topk_ppr_matrix_with_alpha(adj, config.alpha, config, idx)
}

/// Like [`topk_ppr_matrix`] but with an explicit teleport value that is not
/// range-checked. Only `config.eps`, `config.topk` and `config.normalization`
/// are read from `config`.
pub fn topk_ppr_matrix_with_alpha(
    adj: &SparseMatrix,
    alpha: f64,
    config: &PprConfig,
    idx: &[usize],
) -> Result<SparseMatrix> {
    let (n, cols) = adj.shape();
    if n != cols {
        return Err(GraphError::ShapeMismatch {
            expected: (n, n),
            found: (n, cols),
        }
        .into());
    }
    if let Some(&bad) = idx.iter().find(|&&i| i >= n) {
        return Err(RgnnError::node_out_of_range(bad, n));
    }

    let degrees = adj.row_sums();
    let rows: Vec<SparseVector> = idx
        .iter()
        .map(|&source| {
            let row = push_ppr_row(adj, &degrees, source, alpha, config.eps).top_k(config.topk);
            normalize_row(row, source, &degrees, config.normalization)
        })
        .collect();

    let matrix = SparseMatrix::from_rows(n, &rows)?;
    debug!(
        rows = idx.len(),
        nnz = matrix.nnz(),
        alpha,
        topk = config.topk,
        "computed top-k PPR"
    );
    Ok(matrix)
}

/// Forward push from a single source over a weighted adjacency.
fn push_ppr_row(adj: &SparseMatrix, degrees: &[f64], source: usize, alpha: f64, eps: f64) -> SparseVector {
    let alpha_eps = alpha * eps;
    let mut p: HashMap<usize, f64> = HashMap::new();
    let mut r: HashMap<usize, f64> = HashMap::new();
    r.insert(source, alpha);

    let mut queue = vec![source];
    let mut queued: HashSet<usize> = HashSet::from([source]);

    while let Some(u) = queue.pop() {
        queued.remove(&u);
        let res = r.insert(u, 0.0).unwrap_or(0.0);
        *p.entry(u).or_insert(0.0) += res;

        let deg = degrees[u];
        if deg <= 0.0 {
            continue;
        }
        for (v, w) in adj.row_iter(u) {
            let residual = r.entry(v).or_insert(0.0);
            *residual += (1.0 - alpha) * res * w / deg;
            if *residual >= alpha_eps * degrees[v] && queued.insert(v) {
                queue.push(v);
            }
        }
    }

    let mut acc = SparseAccumulator::new(adj.n_cols());
    for (j, v) in p {
        acc.add(j, v);
    }
    acc.into_vector()
}

fn normalize_row(
    row: SparseVector,
    source: usize,
    degrees: &[f64],
    normalization: PprNormalization,
) -> SparseVector {
    let deg = |i: usize| degrees[i].max(DEGREE_FLOOR);
    let mut acc = SparseAccumulator::new(row.dim());
    match normalization {
        PprNormalization::Row => return row,
        PprNormalization::Sym => {
            let src = deg(source).sqrt();
            for (j, v) in row.iter() {
                acc.add(j, src * v / deg(j).sqrt());
            }
        }
        PprNormalization::Col => {
            let src = degrees[source];
            for (j, v) in row.iter() {
                acc.add(j, src * v / deg(j));
            }
        }
    }
    acc.into_vector()
}

/// Updated PPR row of `node_idx` after perturbing its adjacency row.
///
/// `ppr` must hold row-normalized PPR rows for every node (`n x n`);
/// `adj_row` is the clean adjacency row of `node_idx` and `delta` the relaxed
/// perturbation weights in `[0, 1]`. The perturbed row is
/// `a + delta * (1 - 2a)`, i.e. a weight flips an absent edge towards present
/// and a present edge towards absent. A row left without edges receives a
/// placeholder self-loop of [`DISCONNECTED_EDGE_WEIGHT`].
///
/// The result is exact with respect to `ppr`; it carries whatever truncation
/// error the rows of `ppr` already have.
pub fn ppr_update_row(
    ppr: &SparseMatrix,
    adj_row: &SparseVector,
    delta: &SparseVector,
    node_idx: usize,
    alpha: f64,
) -> Result<SparseVector> {
    let n = adj_row.dim();
    if ppr.shape() != (n, n) {
        return Err(GraphError::ShapeMismatch {
            expected: (n, n),
            found: ppr.shape(),
        }
        .into());
    }
    if delta.dim() != n {
        return Err(GraphError::ShapeMismatch {
            expected: (1, n),
            found: (1, delta.dim()),
        }
        .into());
    }
    if node_idx >= n {
        return Err(RgnnError::node_out_of_range(node_idx, n));
    }
    if adj_row.get(node_idx) != 0.0 {
        return Err(PprError::SelfLoop(node_idx).into());
    }
    if let Some((col, weight)) = delta.iter().find(|&(_, w)| !(0.0..=1.0).contains(&w)) {
        return Err(PprError::InvalidPerturbation { col, weight }.into());
    }

    let mut perturbed = SparseAccumulator::new(n);
    perturbed.add_scaled(adj_row.iter(), 1.0);
    for (j, p) in delta.iter() {
        perturbed.add(j, p * (1.0 - 2.0 * adj_row.get(j)));
    }
    let mut perturbed = perturbed.into_vector().retain(|_, v| v != 0.0);
    if perturbed.sum() <= 0.0 {
        perturbed = SparseVector::from_pairs(
            n,
            perturbed
                .iter()
                .chain(std::iter::once((node_idx, DISCONNECTED_EDGE_WEIGHT))),
        )?;
    }
    let deg_new = perturbed.sum();
    let deg_old = adj_row.sum();

    // d = row change of the transition matrix D^-1 A
    let mut d = SparseAccumulator::new(n);
    d.add_scaled(perturbed.iter(), 1.0 / deg_new);
    if deg_old > 0.0 {
        d.add_scaled(adj_row.iter(), -1.0 / deg_old);
    }
    let d = d.into_vector();

    let mut d_ppr = SparseAccumulator::new(n);
    for (j, dj) in d.iter() {
        if dj != 0.0 {
            d_ppr.add_scaled(ppr.row_iter(j), dj);
        }
    }

    let c = (1.0 - alpha) / alpha;
    let denominator = 1.0 - c * d_ppr.get(node_idx);
    if !denominator.is_finite() || denominator.abs() < 1e-12 {
        return Err(PprError::Diverged {
            node: node_idx,
            denominator,
        }
        .into());
    }
    let scale = c * ppr.get(node_idx, node_idx) / denominator;

    let mut updated = SparseAccumulator::new(n);
    updated.add_scaled(ppr.row_iter(node_idx), 1.0);
    updated.add_scaled(d_ppr.into_vector().iter(), scale);
    Ok(updated.into_vector().retain(|_, v| v > 0.0))
}

/// Give every node without edges a placeholder self-loop.
///
/// Returns the repaired matrix and the repaired node indices.
pub fn repair_disconnected(adj: &SparseMatrix) -> Result<(SparseMatrix, Vec<usize>)> {
    let disconnected: Vec<usize> = adj
        .row_sums()
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s == 0.0)
        .map(|(i, _)| i)
        .collect();
    if disconnected.is_empty() {
        return Ok((adj.clone(), disconnected));
    }
    let loops: Vec<(usize, usize, f64)> = disconnected
        .iter()
        .map(|&i| (i, i, DISCONNECTED_EDGE_WEIGHT))
        .collect();
    let repaired = adj.with_added_entries(&loops)?;
    debug!(count = disconnected.len(), "repaired disconnected nodes");
    Ok((repaired, disconnected))
}
