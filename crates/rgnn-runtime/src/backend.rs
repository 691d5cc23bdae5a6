//! Artifact store configuration and factory.
//!
//! Provides a unified interface for selecting and configuring cache backends.

use crate::file_store::FileStore;
use crate::memory_store::MemoryStore;
use rgnn_core::cache::ArtifactStore;
use rgnn_core::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for artifact store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process store (default, no persistence).
    Memory,

    /// JSON files under a root directory.
    File {
        root: PathBuf,
    },

    /// SQLite-backed persistent storage.
    #[cfg(feature = "sqlite")]
    Sqlite {
        /// Path to the SQLite database file.
        /// If None, uses an in-memory SQLite database.
        path: Option<PathBuf>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        StorageConfig::Memory
    }

    pub fn file(root: impl Into<PathBuf>) -> Self {
        StorageConfig::File { root: root.into() }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        StorageConfig::Sqlite {
            path: Some(path.into()),
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_in_memory() -> Self {
        StorageConfig::Sqlite { path: None }
    }
}

/// Trait object for artifact stores.
pub type DynArtifactStore = Box<dyn ArtifactStore + Send>;

/// Create an artifact store from configuration.
///
/// # Errors
/// Returns an error if the backend cannot be opened (directory or database issues).
pub fn create_store(config: &StorageConfig) -> Result<DynArtifactStore> {
    match config {
        StorageConfig::Memory => Ok(Box::new(MemoryStore::new())),
        StorageConfig::File { root } => Ok(Box::new(FileStore::open(root.clone())?)),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            use crate::sqlite_store::SqliteStore;

            let store = match path {
                Some(p) => SqliteStore::open(p)?,
                None => SqliteStore::new_in_memory()?,
            };
            Ok(Box::new(store))
        }
    }
}
