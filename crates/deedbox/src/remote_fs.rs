//! Filesystem remote: treats a mounted or shared directory as the remote
//! tree. Content hashes are SHA-256 of the file bytes.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deedbox_core::models::RemoteEntry;
use deedbox_core::remote::RemoteStorage;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::paths::{relative_slash_path, resolve_under};

pub struct FilesystemRemote {
    root: PathBuf,
    label: String,
}

impl FilesystemRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let label = root.display().to_string();
        Self { root, label }
    }
}

#[async_trait]
impl RemoteStorage for FilesystemRemote {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn root(&self) -> &str {
        &self.label
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan(&root)).await?
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full = resolve_under(&self.root, path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("failed to read {}", full.display()))
    }
}

fn scan(root: &Path) -> Result<Vec<RemoteEntry>> {
    if !root.is_dir() {
        bail!("remote root does not exist: {}", root.display());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        let metadata = entry.metadata()?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let bytes = std::fs::read(entry.path())?;

        entries.push(RemoteEntry {
            path: rel,
            content_hash: Some(format!("{:x}", Sha256::digest(&bytes))),
            size: metadata.len(),
            remote_modified_at: modified,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
