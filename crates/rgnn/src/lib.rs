//! # rgnn
//!
//! Local adversarial attacks on PPR-based graph neural networks, with a
//! content-addressed artifact cache for expensive intermediate results.
//!
//! ## Quick Start
//!
//! ```rust
//! use rgnn::prelude::*;
//!
//! // A path graph 0 - 1 - 2 - 3
//! let file = DatasetFile {
//!     n_nodes: 4,
//!     edges: (0..3)
//!         .map(|i| EdgeRecord { source: i, target: i + 1, weight: 1.0 })
//!         .collect(),
//!     features: vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]],
//!     labels: vec![0, 0, 1, 1],
//!     split: None,
//! };
//! let dataset = Dataset::prepare("path", file, PrepOptions::default(), 0).unwrap();
//!
//! // Top-k PPR rows of two source nodes
//! let config = PprConfig::new(0.15, 1e-6, 4, PprNormalization::Row);
//! let ppr = topk_ppr_matrix(dataset.graph.adjacency(), &config, &[0, 3]).unwrap();
//! assert_eq!(ppr.shape(), (2, 4));
//!
//! // Budget of a local attack on node 1 (degree 2)
//! assert_eq!(local_budget(0.5, dataset.graph.degree(1).unwrap()), 1);
//! ```
//!
//! ## Architecture
//!
//! - [`rgnn_core`] - Sparse matrices, the PPR engine, cache keys and the
//!   artifact store contract, dataset and model types
//! - [`rgnn_runtime`] - Store backends, the local attack controller and
//!   the experiment driver
//!
//! ## Attacks
//!
//! | Attack | PPR during search | Final PPR row |
//! |--------|-------------------|---------------|
//! | `LocalBatchedPRBCD` | Sherman-Morrison update | update, or exact recompute at the end |
//! | `LocalPRBCD` | Sherman-Morrison update | exact recompute |
//!
//! Budgets are `round_half_even(epsilon * degree)`.

// Re-export all subcrates
pub use rgnn_core as core;
pub use rgnn_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust
/// use rgnn::prelude::*;
/// ```
pub mod prelude {
    pub use rgnn_runtime::prelude::*;
}
