//! In-memory [`ChunkStore`] for tests.
//!
//! Chunks live in a `BTreeMap` keyed by document path behind a
//! `std::sync::RwLock`. Vector search is brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{DocumentChunk, ScoredChunk};
use crate::search::rank_top_k;

use super::ChunkStore;

#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<BTreeMap<String, Vec<DocumentChunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory chunk store lock poisoned")
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn replace_chunks(&self, document_path: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        if chunks.is_empty() {
            docs.remove(document_path);
        } else {
            let mut sorted = chunks.to_vec();
            sorted.sort_by_key(|c| c.chunk_index);
            docs.insert(document_path.to_string(), sorted);
        }
        Ok(())
    }

    async fn remove_document(&self, document_path: &str) -> Result<usize> {
        let mut docs = self.docs.write().map_err(poisoned)?;
        Ok(docs.remove(document_path).map(|c| c.len()).unwrap_or(0))
    }

    async fn chunks_for(&self, document_path: &str) -> Result<Vec<DocumentChunk>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.get(document_path).cloned().unwrap_or_default())
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let candidates = docs
            .values()
            .flatten()
            .map(|c| ScoredChunk {
                document_path: c.document_path.clone(),
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                score: cosine_similarity(query, &c.embedding),
            })
            .collect();
        Ok(rank_top_k(candidates, top_k))
    }

    async fn indexed_paths(&self) -> Result<Vec<String>> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.keys().cloned().collect())
    }

    async fn total_chunks(&self) -> Result<usize> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.values().map(Vec::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, index: usize, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            document_path: path.to_string(),
            chunk_index: index,
            text: format!("chunk {} of {}", index, path),
            hash: String::new(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous_chunks() {
        let store = InMemoryStore::new();
        store
            .replace_chunks(
                "a.txt",
                &[chunk("a.txt", 0, vec![1.0, 0.0]), chunk("a.txt", 1, vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        store
            .replace_chunks("a.txt", &[chunk("a.txt", 0, vec![1.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.chunks_for("a.txt").await.unwrap().len(), 1);
        assert_eq!(store.total_chunks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_indexed_paths() {
        let store = InMemoryStore::new();
        store.replace_chunks("b.txt", &[chunk("b.txt", 0, vec![1.0])]).await.unwrap();
        store.replace_chunks("a.txt", &[chunk("a.txt", 0, vec![1.0])]).await.unwrap();
        assert_eq!(store.indexed_paths().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(store.remove_document("a.txt").await.unwrap(), 1);
        assert_eq!(store.remove_document("a.txt").await.unwrap(), 0);
        assert_eq!(store.indexed_paths().await.unwrap(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_similarity() {
        let store = InMemoryStore::new();
        store
            .replace_chunks(
                "a.txt",
                &[chunk("a.txt", 0, vec![1.0, 0.0]), chunk("a.txt", 1, vec![0.6, 0.8])],
            )
            .await
            .unwrap();
        store.replace_chunks("b.txt", &[chunk("b.txt", 0, vec![0.0, 1.0])]).await.unwrap();

        let hits = store.vector_search(&[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_path, "b.txt");
        assert_eq!((hits[1].document_path.as_str(), hits[1].chunk_index), ("a.txt", 1));
    }
}
