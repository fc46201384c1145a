//! SQLite-backed vector store.
//!
//! Vectors are stored as little-endian f32 blobs and ranked with a
//! brute-force cosine scan. The embedding dimension and model id are
//! recorded in `vector_meta`; opening the store with a provider that differs
//! in either drops the stale vectors.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::{ensure_dimension, ensure_k, NoteMetadata, QueryResult, VectorStore};
use crate::core::config::AppPaths;
use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::vector_math::rank_descending_by_cosine;

const DIMENSION_KEY: &str = "embedding_dimension";
const MODEL_KEY: &str = "embedding_model";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn new(
        paths: &AppPaths,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RagError> {
        Self::with_path(paths.vector_db_path.clone(), embedder).await
    }

    pub async fn with_path(
        db_path: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RagError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(RagError::storage)?;

        let store = Self {
            pool,
            embedder,
            db_path,
        };
        store.init_schema().await?;
        store.reconcile_embedding_model().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS note_vectors (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                note_id TEXT NOT NULL UNIQUE,
                document TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;

        Ok(())
    }

    async fn recorded_meta(&self, key: &str) -> Result<Option<String>, RagError> {
        sqlx::query_scalar("SELECT value FROM vector_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(RagError::storage)
    }

    async fn reconcile_embedding_model(&self) -> Result<(), RagError> {
        let dimension = self.embedder.dimension();
        let model = self.embedder.model_id().to_string();
        let recorded_dimension = self.recorded_meta(DIMENSION_KEY).await?;
        let recorded_model = self.recorded_meta(MODEL_KEY).await?;

        let dimension_changed = recorded_dimension
            .as_deref()
            .is_some_and(|recorded| recorded.parse::<usize>().ok() != Some(dimension));
        let model_changed = recorded_model
            .as_deref()
            .is_some_and(|recorded| recorded != model);

        let mut tx = self.pool.begin().await.map_err(RagError::storage)?;

        if dimension_changed || model_changed {
            let dropped = sqlx::query("DELETE FROM note_vectors")
                .execute(&mut *tx)
                .await
                .map_err(RagError::storage)?
                .rows_affected();
            tracing::warn!(
                "Embedding model changed from {} ({} dims) to {} ({} dims); dropped {} stale vectors",
                recorded_model.as_deref().unwrap_or("unknown"),
                recorded_dimension.as_deref().unwrap_or("?"),
                model,
                dimension,
                dropped
            );
        }

        for (key, value) in [(DIMENSION_KEY, dimension.to_string()), (MODEL_KEY, model)] {
            sqlx::query(
                "INSERT INTO vector_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(RagError::storage)?;
        }

        tx.commit().await.map_err(RagError::storage)?;
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
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    async fn upsert(&self, id: &str, text: &str, metadata: NoteMetadata) -> Result<(), RagError> {
        let vector = self.embedder.embed(text).await?;
        ensure_dimension(self.embedder.dimension(), &vector)?;

        let blob = Self::serialize_embedding(&vector);
        let metadata_str = serde_json::to_string(&metadata).map_err(RagError::internal)?;

        sqlx::query(
            "INSERT INTO note_vectors (note_id, document, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(note_id) DO UPDATE SET
                document = excluded.document,
                metadata = excluded.metadata,
                embedding = excluded.embedding,
                updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(id)
        .bind(text)
        .bind(&metadata_str)
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(RagError::storage)?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RagError> {
        let result = sqlx::query("DELETE FROM note_vectors WHERE note_id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_embedding(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<QueryResult>, RagError> {
        ensure_k(k)?;
        let dimension = self.embedder.dimension();
        ensure_dimension(dimension, vector)?;

        let rows = sqlx::query(
            "SELECT note_id, document, metadata, embedding
             FROM note_vectors
             ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RagError::storage)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let embedding = Self::deserialize_embedding(&embedding_bytes);
            let note_id: String = row.get("note_id");
            if embedding.len() != dimension {
                tracing::warn!("Skipping note {} with malformed vector", note_id);
                continue;
            }
            let metadata_str: String = row.get("metadata");
            let metadata = serde_json::from_str::<NoteMetadata>(&metadata_str).unwrap_or_default();
            entries.push((note_id, row.get::<String, _>("document"), metadata, embedding));
        }

        let candidates: Vec<&[f32]> = entries.iter().map(|entry| entry.3.as_slice()).collect();
        let ranked = rank_descending_by_cosine(vector, &candidates)?;

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, similarity)| {
                let (id, document, metadata, _) = &entries[idx];
                QueryResult {
                    id: id.clone(),
                    document: document.clone(),
                    metadata: metadata.clone(),
                    similarity,
                }
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM note_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::storage)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM note_vectors")
            .execute(&self.pool)
            .await
            .map_err(RagError::storage)?;
        tracing::info!("Cleared note vector index at {}", self.db_path.display());
        Ok(())
    }
}
