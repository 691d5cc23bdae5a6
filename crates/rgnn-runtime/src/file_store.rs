//! Directory-backed artifact store.
//!
//! Layout: `<root>/<storage_type>/index.json` lists [`ArtifactMeta`]
//! records, and every payload lives in `<root>/<storage_type>/<id>.json`.
//! The index is rewritten through a temporary file and renamed into place.
//! Concurrent writers are not locked out; the last index write wins.

use rgnn_core::cache::{ArtifactMeta, ArtifactStore, CacheKey};
use rgnn_core::error::{Result, RgnnError, StorageError};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const INDEX_FILE: &str = "index.json";

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, storage_type: &str) -> Result<PathBuf> {
        let valid = !storage_type.is_empty()
            && storage_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RgnnError::invalid_config(
                "storage_type",
                storage_type,
                "use ASCII letters, digits, '_' or '-'",
            ));
        }
        Ok(self.root.join(storage_type))
    }

    fn read_index(&self, dir: &Path) -> Result<Vec<ArtifactMeta>> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path)?;
        let mut entries: Vec<ArtifactMeta> = serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
            id: path.display().to_string(),
            reason: e.to_string(),
        })?;
        entries.sort_by_key(|meta| meta.sequence);
        Ok(entries)
    }

    fn write_index(&self, dir: &Path, entries: &[ArtifactMeta]) -> Result<()> {
        let tmp = dir.join(format!("{}.{}.tmp", INDEX_FILE, uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, dir.join(INDEX_FILE))?;
        Ok(())
    }
}

impl ArtifactStore for FileStore {
    fn entries(&self, storage_type: &str) -> Result<Vec<ArtifactMeta>> {
        let dir = self.table_dir(storage_type)?;
        self.read_index(&dir)
    }

    fn load_payload(&self, storage_type: &str, id: &str) -> Result<Value> {
        let path = self.table_dir(storage_type)?.join(format!("{}.json", id));
        let json = fs::read_to_string(&path).map_err(|e| StorageError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|e| {
            StorageError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn insert(&mut self, storage_type: &str, key: &CacheKey, payload: Value) -> Result<ArtifactMeta> {
        let dir = self.table_dir(storage_type)?;
        fs::create_dir_all(&dir)?;
        let mut entries = self.read_index(&dir)?;

        let meta = ArtifactMeta {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            sequence: entries.iter().map(|m| m.sequence).max().unwrap_or(0) + 1,
            created_at_ms: now_ms(),
        };
        fs::write(dir.join(format!("{}.json", meta.id)), serde_json::to_string(&payload)?)?;
        entries.push(meta.clone());
        self.write_index(&dir, &entries)?;
        debug!(storage_type, id = %meta.id, dir = %dir.display(), "wrote artifact");
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgnn_core::cache::ArtifactStoreExt;
    use rgnn_core::sparse::SparseMatrix;

    #[test]
    fn entries_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new().with("dataset", "toy").with("alpha", 0.1);
        {
            let mut store = FileStore::open(dir.path()).unwrap();
            store.save("ppr", &key, Value::from(vec![1, 2, 3]), true).unwrap();
            store.save("ppr", &key, Value::from(vec![4]), true).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        let found = store.find("ppr", &key, false).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].meta.sequence < found[1].meta.sequence);

        let latest = store.find("ppr", &key, true).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].payload, Value::from(vec![4]));
    }

    #[test]
    fn sparse_matrix_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        let m = SparseMatrix::from_triplets((2, 3), &[0, 1, 1], &[2, 0, 1], &[0.1 + 0.2, 1.0 / 3.0, 2e-17]).unwrap();
        let key = CacheKey::new().with_nodes("ppr_idx", &[1, 0]);
        store.save_sparse_matrix("ppr", &key, &m, true).unwrap();
        let loaded = store.find_sparse_matrix("ppr", &key, true).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, m);
    }

    #[test]
    fn rejects_path_like_storage_types() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(store.insert("../escape", &CacheKey::new(), Value::Null).is_err());
        assert!(store.entries("").is_err());
    }
}
