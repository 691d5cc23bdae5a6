//! # rgnn Core
//!
//! Shared types and numerical kernels for adversarial attacks on graph
//! neural networks at scale.
//!
//! - [`sparse`] — CSR matrices and sparse row vectors
//! - [`types`] — graphs, attribute matrices and prepared datasets
//! - [`ppr`] — top-k approximate Personalized PageRank and its incremental row update
//! - [`cache`] — canonical cache keys and the artifact store interface
//! - [`model`] — the node classifier contract consumed by attacks
//!
//! ## Quick Start
//!
//! ```rust
//! use rgnn_core::prelude::*;
//!
//! // A 3-node path graph 0 - 1 - 2
//! let adj = SparseMatrix::from_triplets(
//!     (3, 3),
//!     &[0, 1, 1, 2],
//!     &[1, 0, 2, 1],
//!     &[1.0, 1.0, 1.0, 1.0],
//! ).unwrap();
//!
//! let config = PprConfig::new(0.15, 1e-4, 3, PprNormalization::Row);
//! let ppr = topk_ppr_matrix(&adj, &config, &[0, 1, 2]).unwrap();
//! assert_eq!(ppr.shape(), (3, 3));
//! ```

pub mod error;
pub mod sparse;
pub mod types;
pub mod ppr;
pub mod perturb;
pub mod cache;
pub mod model;
pub mod prelude;
