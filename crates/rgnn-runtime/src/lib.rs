//! # rgnn Runtime
//!
//! Artifact store backends, local structure attacks and the experiment
//! driver.
//!
//! The runtime sits between the pure algorithms of `rgnn-core` and the CLI:
//! it decides where artifacts are cached, runs attack episodes against a
//! surrogate model and collects per-unit outcomes into a batch report.
//!
//! ## Quick Start
//!
//! ```rust
//! use rgnn_runtime::prelude::*;
//!
//! let mut store = create_store(&StorageConfig::memory()).unwrap();
//! let key = CacheKey::new().with("dataset", "toy");
//! store.save("ppr", &key, serde_json::Value::Null, false).unwrap();
//! assert_eq!(local_budget(0.5, 4.0), 2);
//! ```

pub mod attack;
pub mod backend;
pub mod experiment;
pub mod file_store;
pub mod memory_store;
pub mod prelude;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
