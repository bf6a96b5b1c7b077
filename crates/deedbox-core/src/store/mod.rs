//! Chunk storage abstraction.
//!
//! The [`ChunkStore`] trait is the persistence seam behind the embedding
//! index: a SQLite implementation lives in the app crate, and
//! [`memory::InMemoryStore`] backs tests.
//!
//! Implementations must make [`replace_chunks`](ChunkStore::replace_chunks)
//! atomic: a concurrent reader sees either the previous chunk set for a path
//! or the new one, never a mix.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocumentChunk, ScoredChunk};

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace every chunk for `document_path` with `chunks`.
    ///
    /// An empty slice leaves the document with no chunks.
    async fn replace_chunks(&self, document_path: &str, chunks: &[DocumentChunk]) -> Result<()>;

    /// Delete every chunk for `document_path`, returning how many were removed.
    async fn remove_document(&self, document_path: &str) -> Result<usize>;

    /// Chunks for one document, ordered by `chunk_index`.
    async fn chunks_for(&self, document_path: &str) -> Result<Vec<DocumentChunk>>;

    /// Top `top_k` chunks by cosine similarity to `query`, ranked with
    /// [`crate::search::compare_hits`].
    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Distinct document paths that have at least one chunk, sorted.
    async fn indexed_paths(&self) -> Result<Vec<String>>;

    /// Number of chunks across all documents.
    async fn total_chunks(&self) -> Result<usize>;
}
