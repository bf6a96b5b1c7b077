//! Embedding index: chunk embedding, storage and nearest-neighbor lookup.
//!
//! Writes for one document path are serialized by a per-path async lock,
//! held from the first embedding call until the store has swapped in the
//! new chunk set. Different paths index fully in parallel. Readers never
//! take these locks; the store's atomic replace keeps them consistent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deedbox_core::embedding::Embedder;
use deedbox_core::models::{Chunk, DocumentChunk, ScoredChunk};
use deedbox_core::store::ChunkStore;
use deedbox_core::{Error, Result};
use tokio::sync::OwnedMutexGuard;

/// Lazily created async mutex per document path.
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`. Released when the guard drops.
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // entries nobody holds or waits on
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(locks.entry(path.to_string()).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of paths currently tracked (held or awaited).
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

pub struct EmbeddingIndex {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    locks: PathLocks,
    timeout: Duration,
    batch_size: usize,
}

impl EmbeddingIndex {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            locks: PathLocks::new(),
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Replace every stored chunk of `document_path` with `chunks`,
    /// embedding them first. Returns the number of chunks stored.
    ///
    /// If embedding fails the previous chunk set stays in place.
    pub async fn upsert(&self, document_path: &str, chunks: Vec<Chunk>) -> Result<usize> {
        let guard = self.lock_path(document_path).await;
        self.upsert_locked(&guard, document_path, chunks).await
    }

    /// Exclusive access to `document_path` for a read-then-write sequence.
    ///
    /// Hold the guard across reading the source and [`upsert_locked`]
    /// so a concurrent [`remove`] cannot land in between.
    ///
    /// [`upsert_locked`]: Self::upsert_locked
    /// [`remove`]: Self::remove
    pub async fn lock_path(&self, document_path: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(document_path).await
    }

    /// [`upsert`](Self::upsert) for a caller already holding
    /// [`lock_path`](Self::lock_path) for `document_path`.
    pub async fn upsert_locked(
        &self,
        _guard: &OwnedMutexGuard<()>,
        document_path: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(Error::Provider(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let stored: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| DocumentChunk::from_chunk(chunk, vector))
            .collect();
        self.store.replace_chunks(document_path, &stored).await?;

        tracing::debug!(path = document_path, chunks = stored.len(), "indexed document");
        Ok(stored.len())
    }

    /// Delete every chunk of `document_path`; returns how many were removed.
    pub async fn remove(&self, document_path: &str) -> Result<usize> {
        let _guard = self.locks.lock(document_path).await;
        Ok(self.store.remove_document(document_path).await?)
    }

    /// Top `top_k` chunks by cosine similarity, score descending, ties by
    /// path then chunk index.
    pub async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Err(Error::Config("top_k must be a positive integer".into()));
        }
        Ok(self.store.vector_search(query_embedding, top_k).await?)
    }

    /// Embed one query string under the provider timeout.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Provider("embedding provider returned no vector".into()))
    }

    pub async fn indexed_paths(&self) -> Result<Vec<String>> {
        Ok(self.store.indexed_paths().await?)
    }

    pub async fn total_chunks(&self) -> Result<usize> {
        Ok(self.store.total_chunks().await?)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match tokio::time::timeout(self.timeout, self.embedder.embed(texts)).await {
            Ok(Ok(vectors)) => Ok(vectors),
            Ok(Err(e)) => Err(Error::Provider(format!("embedding failed: {:#}", e))),
            Err(_) => Err(Error::Provider(format!(
                "embedding timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
