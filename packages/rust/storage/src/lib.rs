//! Vector store for knowledge bases, backed by libSQL (offline mode).
//!
//! Each knowledge base owns one database file holding its documents and their
//! embedding vectors in libSQL's native `vector32` encoding. Nearest-neighbor
//! queries run in the database with `vector_distance_l2`; ties are broken by
//! document id so results are stable.
//!
//! Opening is idempotent: [`LibsqlVectorStore::open`] creates the file and
//! schema on first use and simply reconnects afterwards.

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use libsql::{Connection, Database, params};
use sitekb_shared::{Result, SiteKbError};
use tracing::{debug, info};

/// A document plus its embedding, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub title: String,
    pub source_url: String,
    pub metadata: BTreeMap<String, String>,
    pub vector: Vec<f32>,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub content: String,
    pub title: String,
    pub source_url: String,
    pub metadata: BTreeMap<String, String>,
    /// L2 distance to the query vector.
    pub distance: f32,
}

/// Storage + nearest-neighbor contract the pipeline relies on.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records atomically: either all are stored or none.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Up to `k` stored records closest to `vector`, nearest first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<usize>;
}

fn storage_err(e: impl std::fmt::Display) -> SiteKbError {
    SiteKbError::Storage(e.to_string())
}

/// Render a vector as the text literal `vector32()` parses.
fn vector_literal(vector: &[f32]) -> Result<String> {
    serde_json::to_string(vector).map_err(storage_err)
}

/// libSQL-backed [`VectorStore`].
pub struct LibsqlVectorStore {
    db: Database,
    /// Read connection; writes open their own.
    conn: Connection,
}

impl LibsqlVectorStore {
    /// Open or create the store at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteKbError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SiteKbError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    /// Dimension of vectors already stored, if any.
    async fn stored_dims(&self) -> Result<Option<usize>> {
        let mut rows = self
            .conn
            .query("SELECT dims FROM documents LIMIT 1", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(storage_err)? as usize)),
            None => Ok(None),
        }
    }

    async fn insert_all(&self, conn: &Connection, records: &[VectorRecord]) -> Result<()> {
        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata).map_err(storage_err)?;
            conn.execute(
                "INSERT INTO documents (id, content, title, source_url, metadata_json, dims, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, vector32(?7))
                 ON CONFLICT(id) DO UPDATE SET
                   content = excluded.content,
                   title = excluded.title,
                   source_url = excluded.source_url,
                   metadata_json = excluded.metadata_json,
                   dims = excluded.dims,
                   vector = excluded.vector",
                params![
                    record.id.as_str(),
                    record.content.as_str(),
                    record.title.as_str(),
                    record.source_url.as_str(),
                    metadata_json,
                    record.vector.len() as i64,
                    vector_literal(&record.vector)?,
                ],
            )
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LibsqlVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        let dims = first.vector.len();
        if dims == 0 {
            return Err(SiteKbError::Storage("cannot store empty vectors".into()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dims) {
            return Err(SiteKbError::Storage(format!(
                "mixed vector dimensions: {} has {}, expected {dims}",
                bad.id,
                bad.vector.len()
            )));
        }
        if let Some(stored) = self.stored_dims().await? {
            if stored != dims {
                return Err(SiteKbError::Storage(format!(
                    "vector dimension {dims} does not match stored dimension {stored}"
                )));
            }
        }

        let writer = self.db.connect().map_err(storage_err)?;
        let tx = writer.transaction().await.map_err(storage_err)?;
        match self.insert_all(&tx, records).await {
            Ok(()) => tx.commit().await.map_err(storage_err)?,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        }

        debug!(records = records.len(), dims, "vectors upserted");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // A length mismatch fails inside vector_distance_l2.
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, title, source_url, metadata_json,
                        vector_distance_l2(vector, vector32(?1)) AS distance
                 FROM documents
                 ORDER BY distance, id
                 LIMIT ?2",
                params![vector_literal(vector)?, k as i64],
            )
            .await
            .map_err(|e| SiteKbError::Storage(format!("vector query failed: {e}")))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| SiteKbError::Storage(format!("vector query failed: {e}")))?
        {
            let metadata_json: String = row.get(4).map_err(storage_err)?;
            hits.push(VectorHit {
                id: row.get(0).map_err(storage_err)?,
                content: row.get(1).map_err(storage_err)?,
                title: row.get(2).map_err(storage_err)?,
                source_url: row.get(3).map_err(storage_err)?,
                metadata: serde_json::from_str(&metadata_json).map_err(storage_err)?,
                distance: row.get::<f64>(5).map_err(storage_err)? as f32,
            });
        }
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use uuid::Uuid;

    fn temp_db() -> PathBuf {
        std::env::temp_dir()
            .join(format!("sitekb_store_{}", Uuid::now_v7()))
            .join("documents.db")
    }

    fn record(id: &str, content: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            content: content.into(),
            title: format!("{id} title"),
            source_url: format!("https://example.com/{id}"),
            metadata: BTreeMap::from([("kind".to_string(), "page".to_string())]),
            vector,
        }
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.expect("open");
        assert_eq!(store.schema_version().await, 1);
        assert_eq!(store.count().await.unwrap(), 0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn reopen_is_idempotent_and_keeps_data() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        store
            .upsert(&[record("a", "alpha", vec![1.0, 0.0])])
            .await
            .unwrap();
        drop(store);

        let store = LibsqlVectorStore::open(&path).await.expect("second open");
        assert_eq!(store.schema_version().await, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        cleanup(&path);
    }

    #[tokio::test]
    async fn query_orders_by_distance() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        store
            .upsert(&[
                record("far", "far away", vec![0.0, 5.0]),
                record("near", "close by", vec![1.0, 0.1]),
                record("mid", "middle", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].distance < hits[1].distance);
        assert_eq!(hits[0].content, "close by");
        assert_eq!(hits[0].metadata["kind"], "page");
        cleanup(&path);
    }

    #[tokio::test]
    async fn ties_break_by_id() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        store
            .upsert(&[
                record("b", "same", vec![0.0, 1.0]),
                record("a", "same", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[0.0, 1.0], 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        cleanup(&path);
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        store.upsert(&[record("a", "old", vec![1.0])]).await.unwrap();
        store.upsert(&[record("a", "new", vec![2.0])]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query(&[2.0], 1).await.unwrap();
        assert_eq!(hits[0].content, "new");
        assert_eq!(hits[0].distance, 0.0);
        cleanup(&path);
    }

    #[tokio::test]
    async fn mixed_dimensions_are_rejected_atomically() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();

        let err = store
            .upsert(&[record("a", "x", vec![1.0, 0.0]), record("b", "y", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, SiteKbError::Storage(_)));
        assert_eq!(store.count().await.unwrap(), 0);

        store.upsert(&[record("a", "x", vec![1.0, 0.0])]).await.unwrap();
        assert!(store.upsert(&[record("c", "z", vec![1.0, 0.0, 0.0])]).await.is_err());
        assert!(store.query(&[1.0], 1).await.is_err());
        cleanup(&path);
    }

    #[tokio::test]
    async fn empty_store_queries_empty() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        assert!(store.query(&[0.5, 0.5], 5).await.unwrap().is_empty());
        cleanup(&path);
    }

    #[tokio::test]
    async fn vectors_use_native_encoding() {
        let path = temp_db();
        let store = LibsqlVectorStore::open(&path).await.unwrap();
        store
            .upsert(&[record("a", "x", vec![1.0, -2.5])])
            .await
            .unwrap();

        let mut rows = store
            .conn
            .query("SELECT vector_extract(vector) FROM documents", params![])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let text: String = row.get(0).unwrap();
        let stored: Vec<f32> = serde_json::from_str(&text).unwrap();
        assert_eq!(stored, vec![1.0, -2.5]);

        let hits = store.query(&[4.0, 1.5], 1).await.unwrap();
        assert!((hits[0].distance - 5.0).abs() < 1e-5);
        cleanup(&path);
    }
}
