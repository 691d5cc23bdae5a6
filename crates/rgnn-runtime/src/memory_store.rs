//! In-process artifact store.
//!
//! Nothing is persisted; useful for tests and one-shot runs.

use rgnn_core::cache::{ArtifactMeta, ArtifactStore, CacheKey};
use rgnn_core::error::{Result, StorageError};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<(ArtifactMeta, Value)>>,
    next_sequence: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all storage types.
    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryStore {
    fn entries(&self, storage_type: &str) -> Result<Vec<ArtifactMeta>> {
        Ok(self
            .tables
            .get(storage_type)
            .map(|rows| rows.iter().map(|(meta, _)| meta.clone()).collect())
            .unwrap_or_default())
    }

    fn load_payload(&self, storage_type: &str, id: &str) -> Result<Value> {
        self.tables
            .get(storage_type)
            .and_then(|rows| rows.iter().find(|(meta, _)| meta.id == id))
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| {
                StorageError::Corrupt {
                    id: id.to_string(),
                    reason: format!("no payload in '{}'", storage_type),
                }
                .into()
            })
    }

    fn insert(&mut self, storage_type: &str, key: &CacheKey, payload: Value) -> Result<ArtifactMeta> {
        self.next_sequence += 1;
        let meta = ArtifactMeta {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            sequence: self.next_sequence,
            created_at_ms: crate::file_store::now_ms(),
        };
        self.tables
            .entry(storage_type.to_string())
            .or_default()
            .push((meta.clone(), payload));
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgnn_core::cache::{ArtifactStoreExt, SaveOutcome};

    #[test]
    fn sequences_increase_across_types() {
        let mut store = MemoryStore::new();
        let key = CacheKey::new().with("dataset", "toy");
        let a = store.insert("ppr", &key, Value::from(1)).unwrap();
        let b = store.insert("model", &key, Value::from(2)).unwrap();
        assert!(b.sequence > a.sequence);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_policy() {
        let mut store = MemoryStore::new();
        let key = CacheKey::new().with("epsilon", 0.5);
        assert!(store.save("pert", &key, Value::from("a"), false).unwrap().is_saved());
        let second = store.save("pert", &key, Value::from("b"), false).unwrap();
        assert!(matches!(second, SaveOutcome::AlreadyExists(_)));
        assert!(store.save("pert", &key, Value::from("c"), true).unwrap().is_saved());

        let latest: Option<String> = store.load_artifact("pert", &key).unwrap();
        assert_eq!(latest.as_deref(), Some("c"));
        assert_eq!(store.find("pert", &key, false).unwrap().len(), 2);
    }

    #[test]
    fn missing_payload_is_an_error() {
        let store = MemoryStore::new();
        assert!(store.load_payload("ppr", "nope").is_err());
        assert!(store.entries("ppr").unwrap().is_empty());
    }
}
