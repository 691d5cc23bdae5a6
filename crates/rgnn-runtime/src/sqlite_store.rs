//! SQLite-backed artifact store.
//!
//! One `artifacts` table holds every storage type. The canonical key string
//! is stored next to the payload and indexed together with the storage
//! type, so exact-key lookups (`find`, duplicate checks on save) are answered
//! by the index. Listing a storage type and model queries by partial key
//! still read every row of that type.

#![cfg(feature = "sqlite")]

use rgnn_core::cache::{ArtifactMeta, ArtifactStore, CacheKey};
use rgnn_core::error::{Result, RgnnError, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
}

fn sql_err(e: rusqlite::Error) -> RgnnError {
    RgnnError::backend(format!("sqlite: {}", e))
}

impl SqliteStore {
    /// Create a new in-memory SQLite store.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init_with_connection(conn)
    }

    /// Create or open a file-backed SQLite store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS artifacts (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                storage_type TEXT NOT NULL,
                params TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_type_params ON artifacts(storage_type, params);
            "#,
        )
        .map_err(sql_err)?;
        Ok(Self { conn })
    }

    /// Total number of stored artifacts.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))
            .map_err(sql_err)?;
        Ok(n as usize)
    }

    /// Metadata rows returned by `sql`, which binds `args` and selects
    /// `id, params, sequence, created_at_ms`.
    fn query_meta(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ArtifactMeta>> {
        let mut stmt = self.conn.prepare(sql).map_err(sql_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(sql_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, params, sequence, created_at_ms) = row.map_err(sql_err)?;
            let key: CacheKey = serde_json::from_str(&params).map_err(|e| StorageError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            out.push(ArtifactMeta {
                id,
                key,
                sequence: sequence as u64,
                created_at_ms: created_at_ms as u64,
            });
        }
        Ok(out)
    }
}

impl ArtifactStore for SqliteStore {
    fn entries(&self, storage_type: &str) -> Result<Vec<ArtifactMeta>> {
        self.query_meta(
            "SELECT id, params, sequence, created_at_ms FROM artifacts
             WHERE storage_type = ?1 ORDER BY sequence",
            params![storage_type],
        )
    }

    fn entries_with_key(&self, storage_type: &str, key: &CacheKey) -> Result<Vec<ArtifactMeta>> {
        self.query_meta(
            "SELECT id, params, sequence, created_at_ms FROM artifacts
             WHERE storage_type = ?1 AND params = ?2 ORDER BY sequence",
            params![storage_type, key.canonical_string()],
        )
    }

    fn load_payload(&self, storage_type: &str, id: &str) -> Result<Value> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM artifacts WHERE storage_type = ?1 AND id = ?2",
                params![storage_type, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        let payload = payload.ok_or_else(|| StorageError::Corrupt {
            id: id.to_string(),
            reason: format!("no payload in '{}'", storage_type),
        })?;
        serde_json::from_str(&payload).map_err(|e| {
            StorageError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn insert(&mut self, storage_type: &str, key: &CacheKey, payload: Value) -> Result<ArtifactMeta> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at_ms = crate::file_store::now_ms();
        self.conn
            .execute(
                "INSERT INTO artifacts (id, storage_type, params, created_at_ms, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    storage_type,
                    key.canonical_string(),
                    created_at_ms as i64,
                    serde_json::to_string(&payload)?
                ],
            )
            .map_err(sql_err)?;
        Ok(ArtifactMeta {
            id,
            key: key.clone(),
            sequence: self.conn.last_insert_rowid() as u64,
            created_at_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgnn_core::cache::ArtifactStoreExt;

    #[test]
    fn find_returns_latest_entry() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let key = CacheKey::new().with("dataset", "toy");
        store.save("ppr", &key, Value::from(1), true).unwrap();
        store.save("ppr", &key, Value::from(2), true).unwrap();
        store.save("model", &key, Value::from(3), true).unwrap();

        let latest = store.find("ppr", &key, true).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].payload, Value::from(2));
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn exact_key_lookup_uses_the_index() {
        let mut store = SqliteStore::new_in_memory().unwrap();
        let key = CacheKey::new().with("dataset", "toy").with("epsilon", 0.5);
        let other = CacheKey::new().with("dataset", "toy").with("epsilon", 1.0);
        store.save("pert", &key, Value::from(1), true).unwrap();
        store.save("pert", &other, Value::from(2), true).unwrap();
        store.save("ppr", &key, Value::from(3), true).unwrap();

        let found = store.entries_with_key("pert", &key).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, key);
        assert!(!store.save("pert", &key, Value::from(4), false).unwrap().is_saved());

        let plan: String = store
            .conn
            .query_row(
                "EXPLAIN QUERY PLAN SELECT id FROM artifacts WHERE storage_type = ?1 AND params = ?2",
                params!["pert", key.canonical_string()],
                |row| row.get(3),
            )
            .unwrap();
        assert!(plan.contains("idx_artifacts_type_params"), "{}", plan);
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let key = CacheKey::new().with("epsilon", 0.25);
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save("pert", &key, Value::from("x"), false).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let value: Option<String> = store.load_artifact("pert", &key).unwrap();
        assert_eq!(value.as_deref(), Some("x"));
    }
}
