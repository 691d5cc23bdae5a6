//! Incremental PPR update vs full recomputation.
//!
//! The rank-one row update must agree with recomputing PPR on the perturbed
//! adjacency (restricted to the perturbed row) up to push tolerance.

use rgnn_core::prelude::*;

const ALPHA: f64 = 0.15;

/// Two triangles joined by the bridge 2-3.
fn bridged_triangles() -> SparseMatrix {
    let edges = [(0, 1), (1, 2), (2, 0), (2, 3), (3, 4), (4, 5), (5, 3)];
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    for (u, v) in edges {
        rows.extend([u, v]);
        cols.extend([v, u]);
    }
    let vals = vec![1.0; rows.len()];
    SparseMatrix::from_triplets((6, 6), &rows, &cols, &vals).unwrap()
}

fn exact_config() -> PprConfig {
    PprConfig::new(ALPHA, 1e-10, 6, PprNormalization::Row)
}

fn assert_rows_close(a: &SparseVector, b: &SparseVector, tol: f64) {
    let (da, db) = (a.to_dense(), b.to_dense());
    for (j, (x, y)) in da.iter().zip(&db).enumerate() {
        assert!((x - y).abs() < tol, "column {}: incremental {} vs full {}", j, x, y);
    }
}

fn check_against_full(node: usize, delta: &[(usize, f64)]) {
    let adj = bridged_triangles();
    let config = exact_config();
    let all: Vec<usize> = (0..6).collect();
    let ppr = topk_ppr_matrix(&adj, &config, &all).unwrap();

    let delta = SparseVector::from_pairs(6, delta.iter().copied()).unwrap();
    let incremental = ppr_update_row(&ppr, &adj.row(node).unwrap(), &delta, node, ALPHA).unwrap();

    // Only the row of `node` changes: the update models a single-row perturbation.
    let perturbed = materialize_perturbation(&adj, node, &delta, false).unwrap();
    let full = topk_ppr_matrix(&perturbed, &config, &[node]).unwrap().row(0).unwrap();

    assert_rows_close(&incremental, &full, 1e-6);
}

#[test]
fn adding_an_edge_matches_recomputation() {
    check_against_full(0, &[(4, 1.0)]);
}

#[test]
fn removing_an_edge_matches_recomputation() {
    check_against_full(2, &[(3, 1.0)]);
}

#[test]
fn relaxed_weights_match_recomputation() {
    check_against_full(1, &[(0, 0.5), (5, 0.3)]);
}

#[test]
fn isolating_a_node_yields_a_positive_row() {
    // node 6 hangs off node 0 by a single edge
    let mut rows = vec![0, 6];
    let mut cols = vec![6, 0];
    let base = bridged_triangles();
    for (i, j, _) in base.triplets() {
        rows.push(i);
        cols.push(j);
    }
    let vals = vec![1.0; rows.len()];
    let adj = SparseMatrix::from_triplets((7, 7), &rows, &cols, &vals).unwrap();
    let config = PprConfig::new(ALPHA, 1e-10, 7, PprNormalization::Row);
    let all: Vec<usize> = (0..7).collect();
    let ppr = topk_ppr_matrix(&adj, &config, &all).unwrap();

    let delta = SparseVector::from_pairs(7, [(0, 1.0)]).unwrap();
    let row = ppr_update_row(&ppr, &adj.row(6).unwrap(), &delta, 6, ALPHA).unwrap();
    assert!(row.values().iter().all(|v| v.is_finite()));
    assert!(row.sum() > 0.0);
    // A node whose only edge is a self-loop keeps all of its mass.
    assert!((row.get(6) - 1.0).abs() < 1e-6);

    // Materialized path: the repaired row must be strictly positive as well.
    let perturbed = materialize_perturbation(&adj, 6, &delta, true).unwrap();
    assert_eq!(perturbed.row_sums()[6], 0.0);
    let (repaired, fixed) = repair_disconnected(&perturbed).unwrap();
    assert_eq!(fixed, vec![6]);
    assert!(repaired.row_sums()[6] > 0.0);
    let exact = topk_ppr_matrix(&repaired, &config, &[6]).unwrap();
    assert!(exact.values().iter().all(|v| v.is_finite() && *v > 0.0));
}

#[test]
fn update_requires_a_full_ppr_matrix() {
    let adj = bridged_triangles();
    let ppr = topk_ppr_matrix(&adj, &exact_config(), &[0, 1]).unwrap();
    let delta = SparseVector::from_pairs(6, [(4, 1.0)]).unwrap();
    assert!(ppr_update_row(&ppr, &adj.row(0).unwrap(), &delta, 0, ALPHA).is_err());
}
