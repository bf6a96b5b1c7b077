//! Retrieval service: on-demand indexing of synced documents and
//! question answering over the index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deedbox_core::chunk::{chunk_text, ChunkConfig};
use deedbox_core::generate::{build_context, build_prompt, AnswerGenerator, NO_RELEVANT_DOCUMENTS};
use deedbox_core::models::{Chunk, SearchResponse};
use deedbox_core::search::{group_by_document, validate_top_k};
use deedbox_core::{Error, Result};
use serde::Serialize;

use crate::extract::extract_text;
use crate::index::EmbeddingIndex;
use crate::paths::{normalize, resolve_under};

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub local_root: PathBuf,
    pub chunking: ChunkConfig,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub generation_timeout: Duration,
}

/// Acknowledgment for a successful `index_document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub path: String,
    pub chunks: usize,
}

pub struct RetrievalService {
    index: Arc<EmbeddingIndex>,
    generator: Arc<dyn AnswerGenerator>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    /// Fails with [`Error::Config`] when the chunking parameters are invalid.
    pub fn new(
        index: Arc<EmbeddingIndex>,
        generator: Arc<dyn AnswerGenerator>,
        settings: RetrievalSettings,
    ) -> Result<Self> {
        settings.chunking.validate()?;
        validate_top_k(settings.default_top_k, settings.max_top_k)?;
        Ok(Self {
            index,
            generator,
            settings,
        })
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Read, chunk and (re)index the local copy of `path`.
    ///
    /// Fails with [`Error::NotFound`] when the file is not in the local
    /// tree and [`Error::Extract`] when its text cannot be read. Indexing
    /// unchanged content again stores the same chunks.
    pub async fn index_document(&self, path: &str) -> Result<IndexReport> {
        let path = normalize(path)?;
        let full = resolve_under(&self.settings.local_root, &path)?;

        // held until the new chunks are stored, so a concurrent prune of
        // this path runs either before the read or after the write
        let guard = self.index.lock_path(&path).await;

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::NotFound(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound(path)),
            Err(e) => return Err(e.into()),
        }
        let bytes = tokio::fs::read(&full).await?;

        let name = path.clone();
        let text = match tokio::task::spawn_blocking(move || extract_text(&name, &bytes)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(Error::extract(path, e)),
            Err(e) => return Err(Error::extract(path, format!("extractor crashed: {}", e))),
        };

        let chunks: Vec<Chunk> = chunk_text(&path, &text, &self.settings.chunking)?.collect();
        let stored = self.index.upsert_locked(&guard, &path, chunks).await?;
        drop(guard);

        tracing::info!(path = %path, chunks = stored, "document indexed");
        Ok(IndexReport {
            path,
            chunks: stored,
        })
    }

    /// Drop every chunk of `path` from the index.
    pub async fn remove_document(&self, path: &str) -> Result<usize> {
        let path = normalize(path)?;
        self.index.remove(&path).await
    }

    /// Paths that currently have chunks, sorted.
    pub async fn indexed_documents(&self) -> Result<Vec<String>> {
        self.index.indexed_paths().await
    }

    /// Answer `query` from the `top_k` best chunks.
    ///
    /// `top_k` defaults to the configured value. When the index is empty the
    /// answer says so and generation is not invoked.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Config("query must not be empty".into()));
        }
        let top_k = top_k.unwrap_or(self.settings.default_top_k);
        validate_top_k(top_k, self.settings.max_top_k)?;

        if self.index.total_chunks().await? == 0 {
            return Ok(no_relevant_documents());
        }

        let query_embedding = self.index.embed_query(query).await?;
        let hits = self.index.search(&query_embedding, top_k).await?;
        if hits.is_empty() {
            return Ok(no_relevant_documents());
        }

        let context = build_context(&hits);
        let prompt = build_prompt(query, &context);
        let timeout = self.settings.generation_timeout;
        let answer = match tokio::time::timeout(
            timeout,
            self.generator.generate(query, &context, &prompt),
        )
        .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(Error::Provider(format!("answer generation failed: {:#}", e))),
            Err(_) => {
                return Err(Error::Provider(format!(
                    "answer generation timed out after {:?}",
                    timeout
                )))
            }
        };

        Ok(SearchResponse {
            answer,
            results: group_by_document(&hits),
        })
    }
}

fn no_relevant_documents() -> SearchResponse {
    SearchResponse {
        answer: NO_RELEVANT_DOCUMENTS.to_string(),
        results: Vec::new(),
    }
}
