//! SQLite-backed vector store.
//!
//! Metadata and embeddings live in one table; similarity search is
//! brute-force cosine over all rows. Rowid order doubles as insertion
//! recency for tie-breaking.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{cosine_similarity, ScoredRecord, VectorRecord, VectorStore};
use crate::core::errors::RagError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn open(db_path: &Path) -> Result<Self, RagError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(RagError::storage)?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_records (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL DEFAULT 0,
                end_offset INTEGER NOT NULL DEFAULT 0,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_document ON vector_records(document_id)")
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> VectorRecord {
        let embedding_bytes: Vec<u8> = row.get("embedding");
        let start: i64 = row.get("start_offset");
        let end: i64 = row.get("end_offset");

        VectorRecord {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            source: row.get("source"),
            content: row.get("content"),
            start_offset: start as usize,
            end_offset: end as usize,
            vector: Self::deserialize_embedding(&embedding_bytes),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(RagError::storage)?;

        for record in &records {
            let blob = Self::serialize_embedding(&record.vector);
            sqlx::query(
                "INSERT OR REPLACE INTO vector_records
                     (chunk_id, document_id, source, content, start_offset, end_offset, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&record.chunk_id)
            .bind(&record.document_id)
            .bind(&record.source)
            .bind(&record.content)
            .bind(record.start_offset as i64)
            .bind(record.end_offset as i64)
            .bind(&blob)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(RagError::storage)?;
        }

        tx.commit().await.map_err(RagError::storage)?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, RagError> {
        let rows = sqlx::query(
            "SELECT rowid, chunk_id, document_id, source, content,
                    start_offset, end_offset, embedding, created_at
             FROM vector_records",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::storage)?;

        let mut scored: Vec<(i64, ScoredRecord)> = rows
            .iter()
            .map(|row| {
                let rowid: i64 = row.get("rowid");
                let record = Self::row_to_record(row);
                let score = cosine_similarity(query, &record.vector);
                (rowid, ScoredRecord { record, score })
            })
            .collect();

        // Descending similarity; ties go to the most recent insertion.
        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.cmp(&a.0))
        });
        scored.truncate(k.max(1));

        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, RagError> {
        let result = sqlx::query("DELETE FROM vector_records WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::storage)?;

        Ok(count as usize)
    }

    async fn stored_dimension(&self) -> Result<Option<usize>, RagError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dimension'")
                .fetch_optional(&self.pool)
                .await
                .map_err(RagError::storage)?;

        Ok(value.and_then(|v| v.parse().ok()))
    }

    async fn set_dimension(&self, dimension: usize) -> Result<(), RagError> {
        sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dimension', ?1)")
            .bind(dimension.to_string())
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM vector_records")
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;

        Ok(())
    }
}
