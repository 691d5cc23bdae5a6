//! rgnn Core Prelude — convenient imports for common usage.
//!
//! ```rust
//! use rgnn_core::prelude::*;
//! ```

pub use crate::cache::{ArtifactMeta, ArtifactStore, ArtifactStoreExt, CacheKey, SaveOutcome, StoredArtifact};
pub use crate::error::{AttackError, ConfigError, GraphError, PprError, Result, RgnnError, StorageError};
pub use crate::model::{
    classification_statistics, log_softmax, ClassificationStatistics, LinearPprModel, NodeClassifier, Propagation,
};
pub use crate::perturb::{changed_entries, materialize_perturbation, sign_correct};
pub use crate::ppr::{
    ppr_update_row, repair_disconnected, topk_ppr_matrix, topk_ppr_matrix_with_alpha, PprConfig, PprNormalization,
    DISCONNECTED_EDGE_WEIGHT,
};
pub use crate::sparse::{SparseAccumulator, SparseMatrix, SparseVector};
pub use crate::types::{
    Attributes, Dataset, DatasetFile, DatasetLoader, EdgeRecord, Graph, JsonDatasetLoader, PrepOptions, Split,
};
