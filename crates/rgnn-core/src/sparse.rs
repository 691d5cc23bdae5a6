//! Compressed sparse row storage.
//!
//! Adjacency, attribute and PPR matrices all share [`SparseMatrix`]. Rows keep
//! their column indices sorted and unique: every constructor coalesces
//! duplicate `(row, col)` entries by summation.

use crate::error::{GraphError, Result, RgnnError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sparse matrix in CSR layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCsr")]
pub struct SparseMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

/// A sparse row vector with sorted, unique indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSparseVector")]
pub struct SparseVector {
    dim: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

/// Unchecked CSR arrays as they appear in serialized form.
#[derive(Deserialize)]
struct RawCsr {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawSparseVector {
    dim: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

/// Columns of one row must be strictly increasing and below `n_cols`.
fn check_sorted_columns(columns: &[usize], n_cols: usize, row: usize) -> std::result::Result<(), GraphError> {
    if let Some(&c) = columns.iter().find(|&&c| c >= n_cols) {
        return Err(GraphError::InvalidLayout(format!(
            "column {} of row {} exceeds {} columns",
            c, row, n_cols
        )));
    }
    if columns.windows(2).any(|w| w[0] >= w[1]) {
        return Err(GraphError::InvalidLayout(format!("columns of row {} are not sorted and unique", row)));
    }
    Ok(())
}

impl TryFrom<RawCsr> for SparseMatrix {
    type Error = GraphError;

    fn try_from(raw: RawCsr) -> std::result::Result<Self, GraphError> {
        if raw.indptr.len() != raw.n_rows + 1 {
            return Err(GraphError::InvalidLayout(format!(
                "indptr has {} entries for {} rows",
                raw.indptr.len(),
                raw.n_rows
            )));
        }
        if raw.indptr[0] != 0 || raw.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(GraphError::InvalidLayout("indptr must start at 0 and never decrease".into()));
        }
        let nnz = raw.indptr[raw.n_rows];
        if nnz != raw.indices.len() || nnz != raw.values.len() {
            return Err(GraphError::InvalidLayout(format!(
                "indptr ends at {} but there are {} indices and {} values",
                nnz,
                raw.indices.len(),
                raw.values.len()
            )));
        }
        for (row, span) in raw.indptr.windows(2).enumerate() {
            check_sorted_columns(&raw.indices[span[0]..span[1]], raw.n_cols, row)?;
        }
        Ok(Self {
            n_rows: raw.n_rows,
            n_cols: raw.n_cols,
            indptr: raw.indptr,
            indices: raw.indices,
            values: raw.values,
        })
    }
}

impl TryFrom<RawSparseVector> for SparseVector {
    type Error = GraphError;

    fn try_from(raw: RawSparseVector) -> std::result::Result<Self, GraphError> {
        if raw.indices.len() != raw.values.len() {
            return Err(GraphError::InvalidLayout(format!(
                "{} indices but {} values",
                raw.indices.len(),
                raw.values.len()
            )));
        }
        check_sorted_columns(&raw.indices, raw.dim, 0)?;
        Ok(Self {
            dim: raw.dim,
            indices: raw.indices,
            values: raw.values,
        })
    }
}

impl SparseMatrix {
    /// An all-zero matrix.
    pub fn empty(shape: (usize, usize)) -> Self {
        Self {
            n_rows: shape.0,
            n_cols: shape.1,
            indptr: vec![0; shape.0 + 1],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from COO triplets, summing duplicates.
    pub fn from_triplets(
        shape: (usize, usize),
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(GraphError::TripletLength {
                rows: rows.len(),
                cols: cols.len(),
                values: values.len(),
            }
            .into());
        }
        let mut entries = Vec::with_capacity(rows.len());
        for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
            if r >= shape.0 {
                return Err(RgnnError::node_out_of_range(r, shape.0));
            }
            if c >= shape.1 {
                return Err(RgnnError::node_out_of_range(c, shape.1));
            }
            if !v.is_finite() {
                return Err(GraphError::InvalidWeight(v).into());
            }
            entries.push((r, c, v));
        }
        Ok(Self::from_entries(shape, entries))
    }

    /// Build from already validated entries in any order.
    fn from_entries(shape: (usize, usize), mut entries: Vec<(usize, usize, f64)>) -> Self {
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut indptr = vec![0usize; shape.0 + 1];
        let mut indices = Vec::with_capacity(entries.len());
        let mut values: Vec<f64> = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in entries {
            if last == Some((r, c)) {
                if let Some(acc) = values.last_mut() {
                    *acc += v;
                }
                continue;
            }
            indptr[r + 1] += 1;
            indices.push(c);
            values.push(v);
            last = Some((r, c));
        }
        for i in 0..shape.0 {
            indptr[i + 1] += indptr[i];
        }

        Self {
            n_rows: shape.0,
            n_cols: shape.1,
            indptr,
            indices,
            values,
        }
    }

    /// Stack sparse rows into a matrix. Every row must have dimension `n_cols`.
    pub fn from_rows(n_cols: usize, rows: &[SparseVector]) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);
        for row in rows {
            if row.dim() != n_cols {
                return Err(GraphError::ShapeMismatch {
                    expected: (1, n_cols),
                    found: (1, row.dim()),
                }
                .into());
            }
            indices.extend_from_slice(&row.indices);
            values.extend_from_slice(&row.values);
            indptr.push(indices.len());
        }
        Ok(Self {
            n_rows: rows.len(),
            n_cols,
            indptr,
            indices,
            values,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries (explicit zeros included).
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Column indices stored in row `i`.
    pub fn row_indices(&self, i: usize) -> &[usize] {
        &self.indices[self.indptr[i]..self.indptr[i + 1]]
    }

    /// Values stored in row `i`.
    pub fn row_values(&self, i: usize) -> &[f64] {
        &self.values[self.indptr[i]..self.indptr[i + 1]]
    }

    /// Iterate `(col, value)` over row `i`.
    pub fn row_iter(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.row_indices(i)
            .iter()
            .copied()
            .zip(self.row_values(i).iter().copied())
    }

    /// Owned copy of row `i`.
    pub fn row(&self, i: usize) -> Result<SparseVector> {
        if i >= self.n_rows {
            return Err(RgnnError::node_out_of_range(i, self.n_rows));
        }
        Ok(SparseVector {
            dim: self.n_cols,
            indices: self.row_indices(i).to_vec(),
            values: self.row_values(i).to_vec(),
        })
    }

    /// Value at `(i, j)`, zero if absent.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i >= self.n_rows {
            return 0.0;
        }
        let cols = self.row_indices(i);
        match cols.binary_search(&j) {
            Ok(pos) => self.row_values(i)[pos],
            Err(_) => 0.0,
        }
    }

    /// Whether `(i, j)` is stored.
    pub fn contains(&self, i: usize, j: usize) -> bool {
        i < self.n_rows && self.row_indices(i).binary_search(&j).is_ok()
    }

    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n_rows)
            .map(|i| self.row_values(i).iter().sum())
            .collect()
    }

    /// Iterate all `(row, col, value)` triplets in row-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.n_rows).flat_map(move |i| self.row_iter(i).map(move |(j, v)| (i, j, v)))
    }

    pub fn transpose(&self) -> Self {
        let entries = self.triplets().map(|(i, j, v)| (j, i, v)).collect();
        Self::from_entries((self.n_cols, self.n_rows), entries)
    }

    /// Element-wise maximum with the transpose.
    ///
    /// Entries present on only one side keep their value.
    pub fn symmetrize_max(&self) -> Result<Self> {
        if self.n_rows != self.n_cols {
            return Err(GraphError::ShapeMismatch {
                expected: (self.n_rows, self.n_rows),
                found: self.shape(),
            }
            .into());
        }
        let mut merged: HashMap<(usize, usize), f64> = HashMap::with_capacity(2 * self.nnz());
        for (i, j, v) in self.triplets() {
            for key in [(i, j), (j, i)] {
                merged
                    .entry(key)
                    .and_modify(|w| *w = w.max(v))
                    .or_insert(v);
            }
        }
        let entries = merged.into_iter().map(|((i, j), v)| (i, j, v)).collect();
        Ok(Self::from_entries(self.shape(), entries))
    }

    /// Apply `f` to every stored value.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        let mut out = self.clone();
        out.values.iter_mut().for_each(|v| *v = f(*v));
        out
    }

    /// Multiply row `i` by `factors[i]`; missing factors leave the row unchanged.
    pub fn scale_rows(&self, factors: &[f64]) -> Self {
        let mut out = self.clone();
        for i in 0..self.n_rows {
            let f = factors.get(i).copied().unwrap_or(1.0);
            for v in &mut out.values[self.indptr[i]..self.indptr[i + 1]] {
                *v *= f;
            }
        }
        out
    }

    /// Drop stored entries equal to zero.
    pub fn eliminate_zeros(&self) -> Self {
        let entries = self.triplets().filter(|&(_, _, v)| v != 0.0).collect();
        Self::from_entries(self.shape(), entries)
    }

    /// Append entries (summed into existing ones).
    pub fn with_added_entries(&self, extra: &[(usize, usize, f64)]) -> Result<Self> {
        let mut entries: Vec<(usize, usize, f64)> = self.triplets().collect();
        for &(i, j, v) in extra {
            if i >= self.n_rows {
                return Err(RgnnError::node_out_of_range(i, self.n_rows));
            }
            if j >= self.n_cols {
                return Err(RgnnError::node_out_of_range(j, self.n_cols));
            }
            entries.push((i, j, v));
        }
        Ok(Self::from_entries(self.shape(), entries))
    }

    /// Place row `k` of `self` at row `row_ids[k]` of an `n_rows x n_cols` matrix.
    pub fn scatter_rows(&self, row_ids: &[usize], n_rows: usize) -> Result<Self> {
        if row_ids.len() != self.n_rows {
            return Err(GraphError::ShapeMismatch {
                expected: (row_ids.len(), self.n_cols),
                found: self.shape(),
            }
            .into());
        }
        let mut entries = Vec::with_capacity(self.nnz());
        for (k, &target) in row_ids.iter().enumerate() {
            if target >= n_rows {
                return Err(RgnnError::node_out_of_range(target, n_rows));
            }
            entries.extend(self.row_iter(k).map(|(j, v)| (target, j, v)));
        }
        Ok(Self::from_entries((n_rows, self.n_cols), entries))
    }

    /// Set every stored value to one.
    pub fn binarize(&self) -> Self {
        self.map_values(|_| 1.0)
    }

    /// Whether `A[i, j] == A[j, i]` for every stored entry.
    pub fn is_symmetric(&self) -> bool {
        self.n_rows == self.n_cols && self.triplets().all(|(i, j, v)| self.get(j, i) == v)
    }
}

impl SparseVector {
    /// An all-zero vector of dimension `dim`.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from `(index, value)` pairs, summing duplicates.
    pub fn from_pairs(dim: usize, pairs: impl IntoIterator<Item = (usize, f64)>) -> Result<Self> {
        let mut acc = SparseAccumulator::new(dim);
        for (j, v) in pairs {
            if j >= dim {
                return Err(RgnnError::node_out_of_range(j, dim));
            }
            acc.add(j, v);
        }
        Ok(acc.into_vector())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn get(&self, j: usize) -> f64 {
        match self.indices.binary_search(&j) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.dim];
        for (j, v) in self.iter() {
            dense[j] = v;
        }
        dense
    }

    /// Keep entries for which `keep(index, value)` holds.
    pub fn retain(&self, keep: impl Fn(usize, f64) -> bool) -> Self {
        let (indices, values) = self.iter().filter(|&(j, v)| keep(j, v)).unzip();
        Self {
            dim: self.dim,
            indices,
            values,
        }
    }

    /// The `k` largest entries, ties broken by lower index, re-sorted by index.
    pub fn top_k(&self, k: usize) -> Self {
        if self.nnz() <= k {
            return self.clone();
        }
        let mut order: Vec<usize> = (0..self.nnz()).collect();
        order.sort_by(|&a, &b| {
            self.values[b]
                .total_cmp(&self.values[a])
                .then(self.indices[a].cmp(&self.indices[b]))
        });
        order.truncate(k);
        order.sort_unstable();
        Self {
            dim: self.dim,
            indices: order.iter().map(|&p| self.indices[p]).collect(),
            values: order.iter().map(|&p| self.values[p]).collect(),
        }
    }

    /// A `1 x dim` matrix holding this row.
    pub fn to_matrix(&self) -> SparseMatrix {
        SparseMatrix {
            n_rows: 1,
            n_cols: self.dim,
            indptr: vec![0, self.nnz()],
            indices: self.indices.clone(),
            values: self.values.clone(),
        }
    }
}

/// Hash-based accumulator for sparse linear combinations.
#[derive(Debug, Clone)]
pub struct SparseAccumulator {
    dim: usize,
    entries: HashMap<usize, f64>,
}

impl SparseAccumulator {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: HashMap::new(),
        }
    }

    pub fn add(&mut self, j: usize, v: f64) {
        *self.entries.entry(j).or_insert(0.0) += v;
    }

    /// `self += scale * row`.
    pub fn add_scaled(&mut self, row: impl IntoIterator<Item = (usize, f64)>, scale: f64) {
        for (j, v) in row {
            self.add(j, scale * v);
        }
    }

    pub fn get(&self, j: usize) -> f64 {
        self.entries.get(&j).copied().unwrap_or(0.0)
    }

    pub fn into_vector(self) -> SparseVector {
        let mut pairs: Vec<(usize, f64)> = self.entries.into_iter().collect();
        pairs.sort_unstable_by_key(|&(j, _)| j);
        let (indices, values) = pairs.into_iter().unzip();
        SparseVector {
            dim: self.dim,
            indices,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_layout_is_checked_on_load() {
        let mut value = serde_json::to_value(path3()).unwrap();
        let restored: SparseMatrix = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(restored, path3());

        value["indptr"] = serde_json::json!([0, 999, 999, 999]);
        assert!(serde_json::from_value::<SparseMatrix>(value.clone()).is_err());

        value["indptr"] = serde_json::json!([0, 1, 3]);
        assert!(serde_json::from_value::<SparseMatrix>(value.clone()).is_err());

        value["indptr"] = serde_json::json!([0, 1, 3, 4]);
        value["indices"] = serde_json::json!([1, 2, 0, 1]);
        assert!(serde_json::from_value::<SparseMatrix>(value.clone()).is_err());

        value["indices"] = serde_json::json!([1, 0, 2, 7]);
        assert!(serde_json::from_value::<SparseMatrix>(value).is_err());

        let bad_row = serde_json::json!({"dim": 3, "indices": [2, 1], "values": [0.5, 0.5]});
        assert!(serde_json::from_value::<SparseVector>(bad_row).is_err());
    }

    fn path3() -> SparseMatrix {
        SparseMatrix::from_triplets((3, 3), &[0, 1, 1, 2], &[1, 0, 2, 1], &[1.0; 4]).unwrap()
    }

    #[test]
    fn triplets_are_coalesced_by_sum() {
        let m = SparseMatrix::from_triplets((2, 2), &[0, 0, 1], &[1, 1, 0], &[0.5, 0.25, 2.0])
            .unwrap();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 1), 0.75);
        assert_eq!(m.get(1, 0), 2.0);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn out_of_range_triplet_is_rejected() {
        let err = SparseMatrix::from_triplets((2, 2), &[0], &[2], &[1.0]);
        assert!(err.is_err());
    }

    #[test]
    fn symmetrize_max_takes_larger_side() {
        let m = SparseMatrix::from_triplets((3, 3), &[0, 1, 2], &[1, 0, 0], &[0.2, 0.7, 0.4])
            .unwrap();
        let s = m.symmetrize_max().unwrap();
        assert_eq!(s.get(0, 1), 0.7);
        assert_eq!(s.get(1, 0), 0.7);
        assert_eq!(s.get(0, 2), 0.4);
        assert_eq!(s.get(2, 0), 0.4);
        assert!(s.is_symmetric());
    }

    #[test]
    fn scatter_rows_relabels() {
        let m = path3();
        let sub = SparseMatrix::from_rows(3, &[m.row(2).unwrap()]).unwrap();
        let full = sub.scatter_rows(&[2], 3).unwrap();
        assert_eq!(full.shape(), (3, 3));
        assert_eq!(full.get(2, 1), 1.0);
        assert_eq!(full.row_indices(0).len(), 0);
    }

    #[test]
    fn top_k_breaks_ties_by_index() {
        let v = SparseVector::from_pairs(5, [(4, 0.5), (1, 0.5), (2, 0.9), (3, 0.1)]).unwrap();
        let top = v.top_k(2);
        assert_eq!(top.indices(), &[1, 2]);
        assert_eq!(top.values(), &[0.5, 0.9]);
    }

    #[test]
    fn eliminate_zeros_drops_explicit_zeros() {
        let m = SparseMatrix::from_triplets((2, 2), &[0, 0], &[0, 1], &[1.0, -1.0])
            .unwrap()
            .with_added_entries(&[(0, 0, -1.0)])
            .unwrap();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.eliminate_zeros().nnz(), 1);
    }
}
