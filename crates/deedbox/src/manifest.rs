//! Manifest persistence.
//!
//! The manifest is one JSON object mapping path to entry. Saves go through
//! [`write_atomic`]: the bytes land in a uniquely named sibling temp file
//! which is flushed and then renamed over the target, so a crash leaves
//! either the previous manifest or the new one on disk.

use std::path::{Path, PathBuf};

use deedbox_core::models::Manifest;
use deedbox_core::Result;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest; a missing file is an empty manifest.
    pub async fn load(&self) -> Result<Manifest> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the persisted manifest with `manifest` in one step.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        write_json_atomic(&self.path, manifest).await
    }
}

/// Serialize `value` as pretty JSON and write it atomically to `path`.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).await
}

/// Write `bytes` to `path` via a temp file in the same directory + rename.
///
/// Parent directories are created as needed. The temp file is removed if
/// any step fails.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = async {
        use tokio::io::AsyncWriteExt;
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, path).await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
