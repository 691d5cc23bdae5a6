//! Graphs, attribute matrices and prepared datasets.
//!
//! A loaded [`Dataset`] is immutable for the rest of an experiment. Attacks
//! describe perturbations as deltas and materialize new matrices; the source
//! graph is never edited in place.

use crate::error::{GraphError, Result, RgnnError};
use crate::sparse::SparseMatrix;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A weighted adjacency matrix over `n` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    adjacency: SparseMatrix,
    undirected: bool,
}

impl Graph {
    /// Wrap a square adjacency matrix. Undirected graphs must be symmetric.
    pub fn new(adjacency: SparseMatrix, undirected: bool) -> Result<Self> {
        let (rows, cols) = adjacency.shape();
        if rows != cols {
            return Err(GraphError::ShapeMismatch {
                expected: (rows, rows),
                found: (rows, cols),
            }
            .into());
        }
        if undirected && !adjacency.is_symmetric() {
            return Err(RgnnError::invalid_config(
                "adjacency",
                format!("{} stored entries", adjacency.nnz()),
                "undirected graph requires a symmetric adjacency",
            ));
        }
        Ok(Self {
            adjacency,
            undirected,
        })
    }

    pub fn adjacency(&self) -> &SparseMatrix {
        &self.adjacency
    }

    pub fn is_undirected(&self) -> bool {
        self.undirected
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.n_rows()
    }

    /// Logical edge count: half the stored entries when undirected.
    pub fn edge_count(&self) -> usize {
        if self.undirected {
            self.adjacency.nnz() / 2
        } else {
            self.adjacency.nnz()
        }
    }

    /// Weighted out-degree (row sum) of `node`.
    pub fn degree(&self, node: usize) -> Result<f64> {
        if node >= self.n_nodes() {
            return Err(RgnnError::node_out_of_range(node, self.n_nodes()));
        }
        Ok(self.adjacency.row_values(node).iter().sum())
    }

    pub fn degrees(&self) -> Vec<f64> {
        self.adjacency.row_sums()
    }
}

/// Node feature matrix, one row per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attributes {
    Dense(Vec<Vec<f64>>),
    Sparse(SparseMatrix),
}

impl Attributes {
    pub fn n_rows(&self) -> usize {
        match self {
            Attributes::Dense(rows) => rows.len(),
            Attributes::Sparse(m) => m.n_rows(),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Attributes::Dense(rows) => rows.first().map_or(0, Vec::len),
            Attributes::Sparse(m) => m.n_cols(),
        }
    }

    /// Non-zero `(feature, value)` pairs of row `i`.
    pub fn row_entries(&self, i: usize) -> Vec<(usize, f64)> {
        match self {
            Attributes::Dense(rows) => rows
                .get(i)
                .map(|row| {
                    row.iter()
                        .copied()
                        .enumerate()
                        .filter(|&(_, v)| v != 0.0)
                        .collect()
                })
                .unwrap_or_default(),
            Attributes::Sparse(m) if i < m.n_rows() => m.row_iter(i).collect(),
            Attributes::Sparse(_) => Vec::new(),
        }
    }

    /// Set every non-zero feature to one.
    pub fn binarize(&self) -> Self {
        match self {
            Attributes::Dense(rows) => Attributes::Dense(
                rows.iter()
                    .map(|row| {
                        row.iter()
                            .map(|&v| if v != 0.0 { 1.0 } else { 0.0 })
                            .collect()
                    })
                    .collect(),
            ),
            Attributes::Sparse(m) => Attributes::Sparse(m.eliminate_zeros().binarize()),
        }
    }

    /// Scale every row to unit L1 norm; all-zero rows stay zero.
    pub fn normalize_rows(&self) -> Self {
        let scale = |norm: f64| if norm > 0.0 { 1.0 / norm } else { 0.0 };
        match self {
            Attributes::Dense(rows) => Attributes::Dense(
                rows.iter()
                    .map(|row| {
                        let s = scale(row.iter().map(|v| v.abs()).sum());
                        row.iter().map(|v| v * s).collect()
                    })
                    .collect(),
            ),
            Attributes::Sparse(m) => {
                let norms: Vec<f64> = (0..m.n_rows())
                    .map(|i| scale(m.row_values(i).iter().map(|v| v.abs()).sum()))
                    .collect();
                Attributes::Sparse(m.scale_rows(&norms))
            }
        }
    }
}

/// Train/validation/test node indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    /// Seeded random split; whatever is left after train and val goes to test.
    pub fn random(n: usize, train_fraction: f64, val_fraction: f64, seed: u64) -> Self {
        let mut nodes: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        nodes.shuffle(&mut rng);

        let n_train = ((n as f64) * train_fraction).round() as usize;
        let n_val = ((n as f64) * val_fraction).round() as usize;
        let n_train = n_train.min(n);
        let n_val = n_val.min(n - n_train);

        let mut train = nodes[..n_train].to_vec();
        let mut val = nodes[n_train..n_train + n_val].to_vec();
        let mut test = nodes[n_train + n_val..].to_vec();
        train.sort_unstable();
        val.sort_unstable();
        test.sort_unstable();
        Self { train, val, test }
    }
}

/// Graph preparation flags. They also take part in every cache key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrepOptions {
    pub make_undirected: bool,
    pub make_unweighted: bool,
    pub binary_attr: bool,
    /// Row-normalize attributes to unit L1 norm.
    pub normalize: bool,
}

impl PrepOptions {
    /// Attribute normalization scheme as recorded in cache keys.
    pub fn normalize_attr(&self) -> &'static str {
        if self.normalize {
            "l1"
        } else {
            "none"
        }
    }
}

impl Default for PrepOptions {
    fn default() -> Self {
        Self {
            make_undirected: true,
            make_unweighted: true,
            binary_attr: false,
            normalize: false,
        }
    }
}

/// One edge in a dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: usize,
    pub target: usize,
    #[serde(default = "default_edge_weight")]
    pub weight: f64,
}

fn default_edge_weight() -> f64 {
    1.0
}

/// On-disk dataset layout (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub n_nodes: usize,
    pub edges: Vec<EdgeRecord>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    #[serde(default)]
    pub split: Option<Split>,
}

/// A prepared dataset: attributes, graph, labels and split.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub attributes: Attributes,
    pub graph: Graph,
    pub labels: Vec<usize>,
    pub split: Split,
    pub options: PrepOptions,
}

impl Dataset {
    /// Apply preparation flags to a raw dataset file.
    pub fn prepare(
        name: impl Into<String>,
        file: DatasetFile,
        options: PrepOptions,
        seed: u64,
    ) -> Result<Self> {
        let n = file.n_nodes;
        if n == 0 {
            return Err(GraphError::EmptyGraph.into());
        }
        if file.labels.len() != n || file.features.len() != n {
            return Err(RgnnError::invalid_config(
                "dataset",
                format!(
                    "{} labels, {} feature rows",
                    file.labels.len(),
                    file.features.len()
                ),
                format!("expected {} of each", n),
            ));
        }

        let rows: Vec<usize> = file.edges.iter().map(|e| e.source).collect();
        let cols: Vec<usize> = file.edges.iter().map(|e| e.target).collect();
        let vals: Vec<f64> = file.edges.iter().map(|e| e.weight).collect();
        let mut adjacency = SparseMatrix::from_triplets((n, n), &rows, &cols, &vals)?;
        if options.make_undirected {
            adjacency = adjacency.symmetrize_max()?;
        }
        if options.make_unweighted {
            adjacency = adjacency.eliminate_zeros().binarize();
        }
        let graph = Graph::new(adjacency, options.make_undirected)?;

        let mut attributes = Attributes::Dense(file.features);
        if options.binary_attr {
            attributes = attributes.binarize();
        }
        if options.normalize {
            attributes = attributes.normalize_rows();
        }

        let split = match file.split {
            Some(split) => split,
            None => Split::random(n, 0.1, 0.1, seed),
        };
        for &idx in split.train.iter().chain(&split.val).chain(&split.test) {
            if idx >= n {
                return Err(RgnnError::node_out_of_range(idx, n));
            }
        }

        Ok(Self {
            name: name.into(),
            attributes,
            graph,
            labels: file.labels,
            split,
            options,
        })
    }

    /// Read and prepare a JSON dataset file.
    pub fn load_json(
        name: impl Into<String>,
        path: &Path,
        options: PrepOptions,
        seed: u64,
    ) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let file: DatasetFile = serde_json::from_str(&json)?;
        Self::prepare(name, file, options, seed)
    }

    pub fn n_nodes(&self) -> usize {
        self.graph.n_nodes()
    }

    pub fn n_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |&c| c + 1)
    }
}

/// Dataset loading collaborator.
pub trait DatasetLoader {
    fn load(&self, name: &str) -> Result<Dataset>;
}

/// Loads `<root>/<name>.json` files.
#[derive(Debug, Clone)]
pub struct JsonDatasetLoader {
    root: PathBuf,
    options: PrepOptions,
    seed: u64,
}

impl JsonDatasetLoader {
    pub fn new(root: impl Into<PathBuf>, options: PrepOptions, seed: u64) -> Self {
        Self {
            root: root.into(),
            options,
            seed,
        }
    }
}

impl DatasetLoader for JsonDatasetLoader {
    fn load(&self, name: &str) -> Result<Dataset> {
        let path = self.root.join(format!("{}.json", name));
        Dataset::load_json(name, &path, self.options, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star_file() -> DatasetFile {
        DatasetFile {
            n_nodes: 4,
            edges: (1..4)
                .map(|t| EdgeRecord {
                    source: 0,
                    target: t,
                    weight: 2.0,
                })
                .collect(),
            features: vec![vec![1.0, 0.0], vec![0.0, 3.0], vec![2.0, 2.0], vec![0.0, 0.0]],
            labels: vec![0, 1, 1, 0],
            split: None,
        }
    }

    #[test]
    fn prepare_symmetrizes_and_binarizes() {
        let ds = Dataset::prepare("star", star_file(), PrepOptions::default(), 0).unwrap();
        assert!(ds.graph.is_undirected());
        assert_eq!(ds.graph.edge_count(), 3);
        assert_eq!(ds.graph.adjacency().get(2, 0), 1.0);
        assert_eq!(ds.graph.degree(0).unwrap(), 3.0);
        assert_eq!(ds.n_classes(), 2);
    }

    #[test]
    fn directed_graph_counts_every_entry() {
        let options = PrepOptions {
            make_undirected: false,
            make_unweighted: false,
            ..PrepOptions::default()
        };
        let ds = Dataset::prepare("star", star_file(), options, 0).unwrap();
        assert_eq!(ds.graph.edge_count(), 3);
        assert_eq!(ds.graph.degree(0).unwrap(), 6.0);
        assert_eq!(ds.graph.degree(1).unwrap(), 0.0);
    }

    #[test]
    fn normalize_rows_gives_unit_l1() {
        let attrs = Attributes::Dense(vec![vec![1.0, 3.0], vec![0.0, 0.0]]).normalize_rows();
        match attrs {
            Attributes::Dense(rows) => {
                assert!((rows[0][0] - 0.25).abs() < 1e-12);
                assert!((rows[0][1] - 0.75).abs() < 1e-12);
                assert_eq!(rows[1], vec![0.0, 0.0]);
            }
            Attributes::Sparse(_) => panic!("expected dense attributes"),
        }
    }

    #[test]
    fn random_split_is_seeded_and_disjoint() {
        let a = Split::random(20, 0.2, 0.2, 7);
        let b = Split::random(20, 0.2, 0.2, 7);
        assert_eq!(a, b);
        assert_eq!(a.train.len() + a.val.len() + a.test.len(), 20);
        assert!(a.train.iter().all(|i| !a.test.contains(i)));
    }

    #[test]
    fn undirected_graph_requires_symmetry() {
        let adj = SparseMatrix::from_triplets((2, 2), &[0], &[1], &[1.0]).unwrap();
        assert!(Graph::new(adj, true).is_err());
    }
}
