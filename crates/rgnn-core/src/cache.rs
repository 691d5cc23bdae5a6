//! Artifact cache keys and the artifact store interface.
//!
//! Expensive artifacts (PPR matrices, perturbations, trained models) are
//! stored under a [`CacheKey`]: a canonical mapping from parameter name to
//! value. Two keys are equal iff every field matches after canonicalization.
//!
//! Backends only implement the three primitive operations of
//! [`ArtifactStore`]. Lookup and duplicate policy live in
//! [`ArtifactStoreExt`], so every backend behaves the same way.

use crate::error::{Result, StorageError};
use crate::sparse::SparseMatrix;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Canonical parameter mapping. Fields are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(BTreeMap<String, Value>);

impl CacheKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar or list field.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Set a node-set field. Node lists are stored sorted.
    pub fn with_nodes(mut self, name: impl Into<String>, nodes: &[usize]) -> Self {
        let mut sorted = nodes.to_vec();
        sorted.sort_unstable();
        self.0.insert(name.into(), Value::from(sorted));
        self
    }

    /// Nest another key as a sub-mapping.
    pub fn with_key(mut self, name: impl Into<String>, nested: &CacheKey) -> Self {
        self.0.insert(name.into(), nested.to_value());
        self
    }

    /// Fields of `other` override fields of `self`.
    pub fn merged(&self, other: &CacheKey) -> Self {
        let mut out = self.clone();
        out.0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every non-null field of `self` is present in `other` with the same value.
    pub fn is_subset_of(&self, other: &CacheKey) -> bool {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .all(|(k, v)| other.0.get(k) == Some(v))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Compact JSON with sorted fields; equal keys give equal strings.
    pub fn canonical_string(&self) -> String {
        self.to_value().to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    pub key: CacheKey,
    /// Strictly increasing per store; higher means written later.
    pub sequence: u64,
    pub created_at_ms: u64,
}

/// A stored artifact with its payload.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub meta: ArtifactMeta,
    pub payload: Value,
}

/// Result of a save request.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(ArtifactMeta),
    /// An entry with the same key existed and duplicates were not allowed.
    AlreadyExists(ArtifactMeta),
}

impl SaveOutcome {
    pub fn meta(&self) -> &ArtifactMeta {
        match self {
            SaveOutcome::Saved(meta) | SaveOutcome::AlreadyExists(meta) => meta,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }
}

/// Key-value artifact storage backend.
///
/// A store is shared by concurrent experiment processes without locking;
/// concurrent writers of the same key may both succeed.
pub trait ArtifactStore {
    /// All entries of a storage type in ascending `sequence` order.
    fn entries(&self, storage_type: &str) -> Result<Vec<ArtifactMeta>>;

    /// Payload of entry `id`.
    fn load_payload(&self, storage_type: &str, id: &str) -> Result<Value>;

    /// Unconditionally append an entry.
    fn insert(&mut self, storage_type: &str, key: &CacheKey, payload: Value) -> Result<ArtifactMeta>;

    /// Entries stored under exactly `key`, in ascending `sequence` order.
    /// Backends with an index on the key should override the scan.
    fn entries_with_key(&self, storage_type: &str, key: &CacheKey) -> Result<Vec<ArtifactMeta>> {
        Ok(self
            .entries(storage_type)?
            .into_iter()
            .filter(|meta| &meta.key == key)
            .collect())
    }
}

/// Typed lookups shared by every [`ArtifactStore`].
pub trait ArtifactStoreExt: ArtifactStore {
    /// Entries whose key equals `key`, oldest first. With `find_first` only
    /// the most recent match is returned.
    fn find(&self, storage_type: &str, key: &CacheKey, find_first: bool) -> Result<Vec<StoredArtifact>> {
        let mut matches = self.entries_with_key(storage_type, key)?;
        if find_first && matches.len() > 1 {
            warn!(
                storage_type,
                matches = matches.len(),
                "duplicate cache entries, using the most recent"
            );
            matches.sort_by_key(|meta| meta.sequence);
            matches.drain(..matches.len() - 1);
        }
        matches
            .into_iter()
            .map(|meta| {
                let payload = self.load_payload(storage_type, &meta.id)?;
                Ok(StoredArtifact { meta, payload })
            })
            .collect()
    }

    /// Persist `payload` under `key`. Without `ignore_duplicate` an existing
    /// entry with the same key is reported instead of written again.
    fn save(
        &mut self,
        storage_type: &str,
        key: &CacheKey,
        payload: Value,
        ignore_duplicate: bool,
    ) -> Result<SaveOutcome> {
        if !ignore_duplicate {
            if let Some(existing) = self.entries_with_key(storage_type, key)?.pop() {
                debug!(storage_type, id = %existing.id, "artifact already exists");
                return Ok(SaveOutcome::AlreadyExists(existing));
            }
        }
        let meta = self.insert(storage_type, key, payload)?;
        debug!(storage_type, id = %meta.id, sequence = meta.sequence, "saved artifact");
        Ok(SaveOutcome::Saved(meta))
    }

    /// Most recent artifact stored under `key`.
    fn load_artifact<T: DeserializeOwned>(&self, storage_type: &str, key: &CacheKey) -> Result<Option<T>> {
        match self.find(storage_type, key, true)?.pop() {
            Some(artifact) => decode(&artifact).map(Some),
            None => Ok(None),
        }
    }

    fn save_artifact<T: Serialize>(
        &mut self,
        storage_type: &str,
        key: &CacheKey,
        artifact: &T,
        ignore_duplicate: bool,
    ) -> Result<SaveOutcome> {
        let payload = serde_json::to_value(artifact)?;
        self.save(storage_type, key, payload, ignore_duplicate)
    }

    fn find_sparse_matrix(
        &self,
        storage_type: &str,
        key: &CacheKey,
        find_first: bool,
    ) -> Result<Vec<(SparseMatrix, ArtifactMeta)>> {
        self.find(storage_type, key, find_first)?
            .into_iter()
            .map(|artifact| Ok((decode(&artifact)?, artifact.meta)))
            .collect()
    }

    fn save_sparse_matrix(
        &mut self,
        storage_type: &str,
        key: &CacheKey,
        matrix: &SparseMatrix,
        ignore_duplicate: bool,
    ) -> Result<SaveOutcome> {
        self.save_artifact(storage_type, key, matrix, ignore_duplicate)
    }

    /// Models whose stored key contains every non-null field of `query`,
    /// oldest first, paired with their stored key (the hyperparameters).
    fn find_models<M: DeserializeOwned>(&self, storage_type: &str, query: &CacheKey) -> Result<Vec<(M, CacheKey)>> {
        self.entries(storage_type)?
            .into_iter()
            .filter(|meta| query.is_subset_of(&meta.key))
            .map(|meta| {
                let payload = self.load_payload(storage_type, &meta.id)?;
                let model = serde_json::from_value(payload).map_err(|e| StorageError::Corrupt {
                    id: meta.id.clone(),
                    reason: e.to_string(),
                })?;
                Ok((model, meta.key))
            })
            .collect()
    }
}

impl<S: ArtifactStore + ?Sized> ArtifactStoreExt for S {}

fn decode<T: DeserializeOwned>(artifact: &StoredArtifact) -> Result<T> {
    serde_json::from_value(artifact.payload.clone()).map_err(|e| {
        StorageError::Corrupt {
            id: artifact.meta.id.clone(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_lists_are_canonicalized() {
        let a = CacheKey::new().with("dataset", "cora").with_nodes("ppr_idx", &[3, 1, 2]);
        let b = CacheKey::new().with_nodes("ppr_idx", &[1, 2, 3]).with("dataset", "cora");
        assert_eq!(a, b);
        assert_eq!(a.canonical_string(), b.canonical_string());
        assert_eq!(a.canonical_string(), r#"{"dataset":"cora","ppr_idx":[1,2,3]}"#);
    }

    #[test]
    fn differing_field_breaks_equality() {
        let a = CacheKey::new().with("alpha", 0.1).with("topk", 64usize);
        let b = CacheKey::new().with("alpha", 0.2).with("topk", 64usize);
        assert_ne!(a, b);
    }

    #[test]
    fn merged_overrides_fields() {
        let base = CacheKey::new().with("attack", "LocalBatchedPRBCD").with("epsilon", 0.5);
        let out = base.merged(&CacheKey::new().with("epsilon", 1.0));
        assert_eq!(out.get("epsilon"), Some(&Value::from(1.0)));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn subset_ignores_null_fields() {
        let stored = CacheKey::new().with("dataset", "cora").with("label", "Linear PPR");
        let query = CacheKey::new().with("dataset", "cora").with("label", Value::Null);
        assert!(query.is_subset_of(&stored));
        let other = CacheKey::new().with("label", "GCN");
        assert!(!other.is_subset_of(&stored));
    }
}
