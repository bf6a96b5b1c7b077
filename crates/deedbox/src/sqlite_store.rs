//! SQLite-backed [`ChunkStore`].
//!
//! One row per chunk keyed by `(document_path, chunk_index)`, embeddings as
//! little-endian f32 BLOBs. Replacing a document's chunks runs in a single
//! transaction, so readers on other pool connections never see a partial
//! chunk set. Vector search scans every row and scores in Rust.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use deedbox_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use deedbox_core::models::{DocumentChunk, ScoredChunk};
use deedbox_core::search::rank_top_k;
use deedbox_core::store::ChunkStore;

use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn replace_chunks(&self, document_path: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_path = ?")
            .bind(document_path)
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (document_path, chunk_index, text, hash, embedding, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_path)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn remove_document(&self, document_path: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_path = ?")
            .bind(document_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn chunks_for(&self, document_path: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_index, text, hash, embedding
            FROM chunks
            WHERE document_path = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(document_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                DocumentChunk {
                    document_path: document_path.to_string(),
                    chunk_index: row.get::<i64, _>("chunk_index") as usize,
                    text: row.get("text"),
                    hash: row.get("hash"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query("SELECT document_path, chunk_index, text, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    document_path: row.get("document_path"),
                    chunk_index: row.get::<i64, _>("chunk_index") as usize,
                    text: row.get("text"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_top_k(candidates, top_k))
    }

    async fn indexed_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT document_path FROM chunks ORDER BY document_path")
                .fetch_all(&self.pool)
                .await?;
        Ok(paths)
    }

    async fn total_chunks(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
