//! Materializing a single-node perturbation onto the adjacency.
//!
//! A perturbation is a sparse row of weights in `[0, 1]` over candidate
//! columns of one target node. Adding it to the clean adjacency encodes both
//! directions additively: an absent edge becomes `p`, a present edge becomes
//! `1 + p`. [`sign_correct`] folds the second case back to `1 - p`.

use crate::error::{GraphError, Result, RgnnError};
use crate::sparse::{SparseMatrix, SparseVector};

/// Map a coalesced weight `w` to `w` if `w <= 1`, else `2 - w`.
pub fn sign_correct(w: f64) -> f64 {
    if w > 1.0 {
        2.0 - w
    } else {
        w
    }
}

/// Apply `delta` to row `node_idx` of `adj` and return the full perturbed matrix.
///
/// Duplicate entries are summed, then sign-corrected, then zero weights are
/// dropped. For undirected graphs the delta is mirrored onto column
/// `node_idx` and the result is symmetrized by element-wise maximum, so a
/// perturbed `(u, v)` is always matched by `(v, u)`.
pub fn materialize_perturbation(
    adj: &SparseMatrix,
    node_idx: usize,
    delta: &SparseVector,
    undirected: bool,
) -> Result<SparseMatrix> {
    let (n, cols) = adj.shape();
    if n != cols || delta.dim() != n {
        return Err(GraphError::ShapeMismatch {
            expected: (n, n),
            found: (delta.dim(), cols),
        }
        .into());
    }
    if node_idx >= n {
        return Err(RgnnError::node_out_of_range(node_idx, n));
    }

    let mut extra: Vec<(usize, usize, f64)> = Vec::with_capacity(2 * delta.nnz());
    for (j, p) in delta.iter() {
        extra.push((node_idx, j, p));
        if undirected && j != node_idx {
            extra.push((j, node_idx, p));
        }
    }

    let updated = adj
        .with_added_entries(&extra)?
        .map_values(sign_correct)
        .eliminate_zeros();

    if undirected {
        updated.symmetrize_max()
    } else {
        Ok(updated)
    }
}

/// Entries whose presence differs between `before` and `after`, as `(row, col)`.
pub fn changed_entries(before: &SparseMatrix, after: &SparseMatrix) -> Vec<(usize, usize)> {
    let mut changed: Vec<(usize, usize)> = before
        .triplets()
        .filter(|&(i, j, _)| !after.contains(i, j))
        .map(|(i, j, _)| (i, j))
        .chain(
            after
                .triplets()
                .filter(|&(i, j, _)| !before.contains(i, j))
                .map(|(i, j, _)| (i, j)),
        )
        .collect();
    changed.sort_unstable();
    changed
}
