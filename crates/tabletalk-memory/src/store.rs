use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::embedding::EmbeddingProvider;

/// Provenance of an ingested document: which upload it came from and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub file_id: i64,
    pub file_name: String,
    pub record_index: usize,
}

/// One unit of retrievable text derived from a stored record.
/// The id is a pure function of (file id, record index), so re-ingestion
/// upserts rather than duplicates.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub body: String,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub body: String,
    pub metadata: DocMetadata,
    pub score: f64,
}

/// Similarity-searchable document index consumed by the chat engine and
/// fed by the ingestion pipeline.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Upsert documents by id; last write wins per id.
    async fn add_documents(&self, documents: Vec<Document>) -> Result<()>;
    /// Top-k documents ranked by similarity to the query text.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Initialize sqlite-vec extension. Must be called before Connection::open().
fn init_sqlite_vec() {
    use rusqlite::ffi::{sqlite3, sqlite3_api_routines, sqlite3_auto_extension};

    type Sqlite3AutoExtFn =
        unsafe extern "C" fn(*mut sqlite3, *mut *mut i8, *const sqlite3_api_routines) -> i32;

    unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<*const (), Sqlite3AutoExtFn>(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    }
}

type Migration = (i64, &'static str);

fn migrations() -> Vec<Migration> {
    vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            file_id INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            record_index INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_file_id ON documents(file_id);

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )]
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;
    let applied: i64 = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |r| {
            r.get::<_, String>(0)
        })
        .optional()?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    for (version, sql) in migrations() {
        if version <= applied {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![version.to_string()],
        )?;
    }
    Ok(())
}

/// Document index backed by SQLite with the sqlite-vec extension.
/// Embeds bodies via the configured provider on write and queries the
/// vec0 virtual table for KNN retrieval.
#[derive(Clone)]
pub struct DocumentStore {
    db: Arc<Mutex<Connection>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl DocumentStore {
    pub fn open(path: &str, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    pub fn open_in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    /// Recreate the vec0 table when the embedding dimensionality changes.
    fn ensure_vec_table(&self, dimensions: usize) -> Result<()> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

        let current_dims: Option<String> = db
            .query_row(
                "SELECT value FROM meta WHERE key = 'vec_dimensions'",
                [],
                |r| r.get(0),
            )
            .optional()?;

        let needs_recreate = match current_dims {
            Some(d) => d.parse::<usize>().unwrap_or(0) != dimensions,
            None => true,
        };

        if needs_recreate {
            db.execute_batch("DROP TABLE IF EXISTS documents_vec;")?;
            db.execute_batch(&format!(
                "CREATE VIRTUAL TABLE documents_vec USING vec0(document_id TEXT PRIMARY KEY, embedding float[{dimensions}]);"
            ))?;
            db.execute(
                "INSERT INTO meta(key, value) VALUES('vec_dimensions', ?1) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![dimensions.to_string()],
            )?;
            tracing::info!("Created documents_vec virtual table with {dimensions} dimensions");
        }

        Ok(())
    }

    pub async fn document_count(&self) -> Result<usize> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
            Ok::<usize, anyhow::Error>(count as usize)
        })
        .await?
    }
}

#[async_trait]
impl ContextStore for DocumentStore {
    async fn add_documents(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let bodies: Vec<String> = documents.iter().map(|d| d.body.clone()).collect();
        let embedded = self.embedder.embed(&bodies).await?;
        if embedded.embeddings.len() != documents.len() {
            return Err(anyhow!(
                "embedding count mismatch: expected {}, got {}",
                documents.len(),
                embedded.embeddings.len()
            ));
        }

        self.ensure_vec_table(embedded.dimensions)?;

        let now = chrono::Utc::now().to_rfc3339();
        let rows: Vec<(Document, String)> = documents
            .into_iter()
            .zip(embedded.embeddings.iter())
            .map(|(doc, embedding)| (doc, embedding_to_json(embedding)))
            .collect();

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let tx = conn.unchecked_transaction()?;

            for (doc, embedding_json) in rows {
                tx.execute(
                    r#"
                    INSERT INTO documents(id, body, file_id, file_name, record_index, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(id) DO UPDATE SET
                        body = excluded.body,
                        file_id = excluded.file_id,
                        file_name = excluded.file_name,
                        record_index = excluded.record_index,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        doc.id,
                        doc.body,
                        doc.metadata.file_id,
                        doc.metadata.file_name,
                        doc.metadata.record_index as i64,
                        now
                    ],
                )?;
                // vec0 virtual tables do not implement OR REPLACE conflict
                // resolution, so upsert as delete-then-insert.
                tx.execute(
                    "DELETE FROM documents_vec WHERE document_id = ?1",
                    params![doc.id],
                )?;
                tx.execute(
                    "INSERT INTO documents_vec(document_id, embedding) VALUES (?1, ?2)",
                    params![doc.id, embedding_json],
                )?;
            }

            tx.commit()?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embedded = self.embedder.embed(&[query.to_owned()]).await?;
        let query_embedding = embedded
            .embeddings
            .first()
            .ok_or_else(|| anyhow!("embedding provider returned empty query embedding"))?;
        let query_embedding_json = embedding_to_json(query_embedding);

        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

            let has_vec_table: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_vec'",
                    [],
                    |r| r.get(0),
                )
                .unwrap_or(false);
            if !has_vec_table {
                return Ok(Vec::new());
            }

            let mut stmt = conn.prepare(
                r#"
                SELECT d.body, d.file_id, d.file_name, d.record_index, v.distance
                FROM documents_vec v
                JOIN documents d ON d.id = v.document_id
                WHERE v.embedding MATCH ?1 AND k = ?2
                "#,
            )?;
            let rows = stmt.query_map(params![query_embedding_json, k as i64], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, f64>(4)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (body, file_id, file_name, record_index, distance) = row?;
                out.push(RetrievedDocument {
                    body,
                    metadata: DocMetadata {
                        file_id,
                        file_name,
                        record_index: record_index as usize,
                    },
                    score: (1.0_f64 - distance).max(0.0_f64),
                });
            }
            out.sort_by(|a, b| b.score.total_cmp(&a.score));
            out.truncate(k);
            Ok::<Vec<RetrievedDocument>, anyhow::Error>(out)
        })
        .await?
    }
}

fn embedding_to_json(embedding: &[f32]) -> String {
    serde_json::to_string(embedding).unwrap_or_else(|_| "[]".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::StubEmbeddingProvider;

    fn test_store() -> DocumentStore {
        let embedder = Arc::new(StubEmbeddingProvider::new(8));
        DocumentStore::open_in_memory(embedder).expect("open in-memory store")
    }

    fn doc(id: &str, body: &str, index: usize) -> Document {
        Document {
            id: id.to_string(),
            body: body.to_string(),
            metadata: DocMetadata {
                file_id: 1,
                file_name: "sales.csv".to_string(),
                record_index: index,
            },
        }
    }

    #[tokio::test]
    async fn add_and_search_returns_documents() {
        let store = test_store();
        store
            .add_documents(vec![
                doc("file_1_record_0", "region: north, total: 120", 0),
                doc("file_1_record_1", "region: south, total: 80", 1),
            ])
            .await
            .unwrap();

        let results = store.similarity_search("north sales", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.file_name, "sales.csv");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn search_respects_k() {
        let store = test_store();
        let docs: Vec<Document> = (0..6)
            .map(|i| doc(&format!("file_1_record_{i}"), &format!("row {i}"), i))
            .collect();
        store.add_documents(docs).await.unwrap();

        let results = store.similarity_search("row", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn reingesting_same_id_upserts() {
        let store = test_store();
        store
            .add_documents(vec![doc("file_1_record_0", "old body", 0)])
            .await
            .unwrap();
        store
            .add_documents(vec![doc("file_1_record_0", "new body", 0)])
            .await
            .unwrap();

        assert_eq!(store.document_count().await.unwrap(), 1);
        let results = store.similarity_search("body", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].body, "new body");
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let store = test_store();
        store
            .add_documents(vec![doc("file_1_record_0", "something", 0)])
            .await
            .unwrap();
        let results = store.similarity_search("   ", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_on_empty_store_returns_nothing() {
        let store = test_store();
        let results = store.similarity_search("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn add_empty_batch_is_noop() {
        let store = test_store();
        store.add_documents(Vec::new()).await.unwrap();
        assert_eq!(store.document_count().await.unwrap(), 0);
    }
}
