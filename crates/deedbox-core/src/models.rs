//! Core data types that flow through sync, indexing and retrieval.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a manifest entry's local copy stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalState {
    Present,
    /// Never written here: a manifest is saved only after every download of
    /// the run has settled. Read from manifests written by older tooling and
    /// always planned as an update, so the file is fetched again.
    PendingDownload,
    Deleted,
}

/// Persisted record of one remote document, keyed by path in [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub size: u64,
    pub remote_modified_at: DateTime<Utc>,
    pub local_state: LocalState,
}

impl ManifestEntry {
    /// Build a `PRESENT` entry from a freshly downloaded remote file.
    pub fn present(remote: &RemoteEntry) -> Self {
        Self {
            content_hash: remote.fingerprint(),
            size: remote.size,
            remote_modified_at: remote.remote_modified_at,
            local_state: LocalState::Present,
        }
    }

    pub fn is_present(&self) -> bool {
        self.local_state == LocalState::Present
    }
}

/// Mapping of slash-separated path (relative to the sync root) to its entry.
///
/// A `BTreeMap` keeps at most one entry per path and serializes in a stable
/// order, so two saves of the same manifest are byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    /// Paths whose local copy is currently `PRESENT`.
    pub fn present_paths(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_present())
            .map(|(p, _)| p.as_str())
    }

    pub(crate) fn get_mut(&mut self, path: &str) -> Option<&mut ManifestEntry> {
        self.entries.get_mut(path)
    }
}

impl FromIterator<(String, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, ManifestEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One file as reported by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Slash-separated path relative to the sync root, no leading slash.
    pub path: String,
    /// Provider content hash, when the backend exposes one.
    pub content_hash: Option<String>,
    pub size: u64,
    pub remote_modified_at: DateTime<Utc>,
}

impl RemoteEntry {
    /// The value stored as `content_hash` in the manifest.
    ///
    /// Falls back to a size/mtime fingerprint for backends without hashes.
    pub fn fingerprint(&self) -> String {
        match &self.content_hash {
            Some(h) if !h.is_empty() => h.clone(),
            _ => format!("size:{}:mtime:{}", self.size, self.remote_modified_at.timestamp()),
        }
    }

    /// Whether this listing differs from what the manifest recorded.
    pub fn differs_from(&self, entry: &ManifestEntry) -> bool {
        self.fingerprint() != entry.content_hash
            || self.remote_modified_at != entry.remote_modified_at
    }

    /// Final path component, used as the display name.
    pub fn name(&self) -> &str {
        document_name(&self.path)
    }
}

/// Final path component of a slash-separated document path.
pub fn document_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Overall outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

/// A per-path failure recorded during a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Summary of one sync run, written to the status file (overwritten each run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub run_started_at: DateTime<Utc>,
    pub run_finished_at: DateTime<Utc>,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub files_failed: Vec<FileFailure>,
    pub overall_status: OverallStatus,
}

impl SyncStatus {
    /// Derive the overall status from per-operation counts.
    ///
    /// `FAILED` only when every attempted file operation failed, `PARTIAL`
    /// when some did, `SUCCESS` otherwise (including runs with no work).
    pub fn overall(succeeded: usize, failed: usize) -> OverallStatus {
        if failed == 0 {
            OverallStatus::Success
        } else if succeeded == 0 {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        }
    }

    /// Status for a run aborted because the remote could not be listed.
    pub fn listing_failed(
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
        root: &str,
        error: &str,
    ) -> Self {
        Self {
            run_started_at: started,
            run_finished_at: finished,
            files_added: 0,
            files_updated: 0,
            files_deleted: 0,
            files_failed: vec![FileFailure {
                path: root.to_string(),
                error: error.to_string(),
            }],
            overall_status: OverallStatus::Failed,
        }
    }
}

/// A retrieval unit produced by the chunker, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_path: String,
    /// 0-based, contiguous within one document.
    pub chunk_index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A stored chunk with its embedding. Unique by `(document_path, chunk_index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub document_path: String,
    pub chunk_index: usize,
    pub text: String,
    pub hash: String,
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            document_path: chunk.document_path,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            hash: chunk.hash,
            embedding,
        }
    }
}

/// A chunk returned from nearest-neighbor search with its cosine score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub document_path: String,
    pub chunk_index: usize,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`; higher is more relevant.
    pub score: f32,
}

/// Document reference in a search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub name: String,
    pub path: String,
    /// Text of the best-matching chunk.
    pub content: String,
}

/// One per-document search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: DocumentRef,
    pub score: f32,
}

/// Response of a retrieval query: synthesized answer plus ranked documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: String,
    pub results: Vec<SearchResult>,
}
