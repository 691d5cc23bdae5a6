//! rgnn Runtime Prelude — convenient imports for common usage.
//!
//! ```rust
//! use rgnn_runtime::prelude::*;
//! ```

pub use rgnn_core::prelude::*;

// Re-export attacks
pub use crate::attack::{
    Attack, AttackKind, FullRecompute, IncrementalUpdate, LocalAttack, LocalAttackConfig, LocalPerturbation, LossType,
    PerturbedGraph, PprCacheParams, PprContext, PprUpdate, PprUpdateMode, RecalcAlpha, RecalcAtEnd, SearchSpace,
    load_or_compute_ppr, project_to_budget,
};

// Re-export the experiment driver
pub use crate::experiment::{
    global_budget, local_budget, model_params, round_half_even, run_local_experiment, select_attack_nodes,
    validate_epsilons, BatchReport, LocalExperimentConfig, LocalResult, NodeSelection, Stage, UnitFailure,
    UnitOutcome, Victim,
};

// Re-export store backends
pub use crate::backend::{create_store, DynArtifactStore, StorageConfig};
pub use crate::file_store::FileStore;
pub use crate::memory_store::MemoryStore;

#[cfg(feature = "sqlite")]
pub use crate::sqlite_store::SqliteStore;
