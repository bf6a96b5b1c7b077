//! Sync reconciler: mirrors the remote tree into the local root.
//!
//! One run:
//!
//! 1. Take the run lock (fail fast with `AlreadyRunning`).
//! 2. Load the manifest and list the remote. A listing failure writes a
//!    `FAILED` status and aborts before anything else is touched.
//! 3. Plan added / updated / deleted paths against the manifest.
//! 4. Download added and updated files through a bounded worker pool, each
//!    written to a temp file and renamed into place.
//! 5. Remove local copies of deleted paths.
//! 6. Fold the outcomes into a new manifest and save it atomically, once,
//!    after every worker has settled.
//! 7. Drop index chunks of paths that are no longer `PRESENT`, then write
//!    the status file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deedbox_core::models::{Manifest, RemoteEntry, SyncStatus};
use deedbox_core::reconcile::{apply_outcomes, plan_sync, Outcome, SyncPlan};
use deedbox_core::remote::RemoteStorage;
use deedbox_core::{Error, Result};
use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::index::EmbeddingIndex;
use crate::lock::RunLock;
use crate::manifest::{write_atomic, write_json_atomic, ManifestStore};
use crate::paths::{normalize, resolve_under, IncludeFilter};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub local_root: PathBuf,
    pub manifest_path: PathBuf,
    pub status_path: PathBuf,
    pub lock_path: PathBuf,
    pub concurrency: usize,
    pub timeout: Duration,
    pub include_globs: Vec<String>,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            local_root: config.sync.local_root.clone(),
            manifest_path: config.sync.manifest_path.clone(),
            status_path: config.sync.status_path.clone(),
            lock_path: config.sync.lock_path(),
            concurrency: config.sync.concurrency,
            timeout: Duration::from_secs(config.sync.timeout_secs),
            include_globs: config.sync.include_globs.clone(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub status: SyncStatus,
    pub manifest: Manifest,
    /// Paths downloaded successfully this run (added or updated).
    pub changed: Vec<String>,
}

pub struct SyncReconciler {
    remote: Arc<dyn RemoteStorage>,
    manifest: ManifestStore,
    settings: SyncSettings,
    filter: Option<IncludeFilter>,
    index: Option<Arc<EmbeddingIndex>>,
}

impl SyncReconciler {
    pub fn new(remote: Arc<dyn RemoteStorage>, settings: SyncSettings) -> Result<Self> {
        if settings.concurrency == 0 {
            return Err(Error::Config("sync concurrency must be > 0".into()));
        }
        let filter = if settings.include_globs.is_empty() {
            None
        } else {
            Some(
                IncludeFilter::new(&settings.include_globs)
                    .map_err(|e| Error::Config(format!("invalid include glob: {}", e)))?,
            )
        };
        Ok(Self {
            remote,
            manifest: ManifestStore::new(&settings.manifest_path),
            settings,
            filter,
            index: None,
        })
    }

    /// Keep `index` consistent with the manifest after every run.
    pub fn with_index(mut self, index: Arc<EmbeddingIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn manifest_store(&self) -> &ManifestStore {
        &self.manifest
    }

    pub async fn run(&self) -> Result<SyncRun> {
        let _lock = RunLock::acquire(&self.settings.lock_path)?;
        let started = Utc::now();
        let manifest = self.manifest.load().await?;

        let listing = match self.list_remote().await {
            Ok(listing) => listing,
            Err(message) => {
                tracing::error!(remote = self.remote.name(), error = %message, "remote listing failed");
                let status =
                    SyncStatus::listing_failed(started, Utc::now(), self.remote.root(), &message);
                write_json_atomic(&self.settings.status_path, &status).await?;
                return Err(Error::transfer(self.remote.root(), message));
            }
        };

        let root = &self.settings.local_root;
        let plan = plan_sync(&listing, &manifest, |path| {
            resolve_under(root, path).map(|p| p.is_file()).unwrap_or(false)
        });
        tracing::info!(
            remote = self.remote.name(),
            listed = listing.len(),
            added = plan.added.len(),
            updated = plan.updated.len(),
            deleted = plan.deleted.len(),
            unchanged = plan.unchanged,
            "sync plan"
        );

        let mut outcomes = self.download_all(&plan).await;
        for path in &plan.deleted {
            outcomes.insert(path.clone(), self.remove_local(path).await);
        }
        for (path, outcome) in &outcomes {
            if let Outcome::Failed(error) = outcome {
                tracing::warn!(path = %path, error = %error, "file operation failed");
            }
        }

        let reconciled = apply_outcomes(&manifest, &plan, &outcomes);
        self.manifest.save(&reconciled.manifest).await?;

        if let Some(index) = &self.index {
            let removed: Vec<&str> = plan
                .deleted
                .iter()
                .filter(|p| outcomes.get(*p) == Some(&Outcome::Done))
                .map(String::as_str)
                .collect();
            prune_index(index, &reconciled.manifest, &removed).await;
        }

        let changed: Vec<String> = plan
            .downloads()
            .filter(|e| outcomes.get(&e.path) == Some(&Outcome::Done))
            .map(|e| e.path.clone())
            .collect();
        let new_manifest = reconciled.manifest.clone();
        let status = reconciled.into_status(started, Utc::now());
        write_json_atomic(&self.settings.status_path, &status).await?;

        tracing::info!(
            added = status.files_added,
            updated = status.files_updated,
            deleted = status.files_deleted,
            failed = status.files_failed.len(),
            status = ?status.overall_status,
            "sync finished"
        );

        Ok(SyncRun {
            status,
            manifest: new_manifest,
            changed,
        })
    }

    /// List the remote under the timeout, keeping only safe, included paths.
    async fn list_remote(&self) -> std::result::Result<Vec<RemoteEntry>, String> {
        let listing = match tokio::time::timeout(self.settings.timeout, self.remote.list()).await {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => return Err(format!("{:#}", e)),
            Err(_) => {
                return Err(format!(
                    "listing timed out after {:?}",
                    self.settings.timeout
                ))
            }
        };

        let mut kept = Vec::with_capacity(listing.len());
        for mut entry in listing {
            match normalize(&entry.path) {
                Ok(path) => entry.path = path,
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "skipping unsafe remote path");
                    continue;
                }
            }
            if self.filter.as_ref().is_some_and(|f| !f.is_match(&entry.path)) {
                continue;
            }
            kept.push(entry);
        }
        Ok(kept)
    }

    async fn download_all(&self, plan: &SyncPlan) -> BTreeMap<String, Outcome> {
        // owned entries keep the worker futures `Send` for any caller lifetime
        let entries: Vec<RemoteEntry> = plan.downloads().cloned().collect();
        stream::iter(entries)
            .map(|entry| async move {
                let outcome = match self.download_one(&entry).await {
                    Ok(()) => Outcome::Done,
                    Err(e) => Outcome::Failed(e),
                };
                (entry.path, outcome)
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await
    }

    async fn download_one(&self, entry: &RemoteEntry) -> std::result::Result<(), String> {
        let dest = resolve_under(&self.settings.local_root, &entry.path).map_err(|e| e.to_string())?;
        let bytes = match tokio::time::timeout(self.settings.timeout, self.remote.download(&entry.path))
            .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(format!("{:#}", e)),
            Err(_) => return Err(format!("download timed out after {:?}", self.settings.timeout)),
        };
        write_atomic(&dest, &bytes).await.map_err(|e| e.to_string())?;
        tracing::debug!(path = %entry.path, bytes = bytes.len(), "downloaded");
        Ok(())
    }

    async fn remove_local(&self, path: &str) -> Outcome {
        let full = match resolve_under(&self.settings.local_root, path) {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Outcome::Done,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Outcome::Done,
            Err(e) => Outcome::Failed(format!("failed to remove local copy: {}", e)),
        }
    }
}

/// Remove chunks of every indexed path that is not `PRESENT` in `manifest`,
/// and of every path whose local copy this run removed.
///
/// `removed` paths are pruned even when they have no chunks yet: an
/// `index_document` call holding the path lock may be about to write them.
async fn prune_index(index: &EmbeddingIndex, manifest: &Manifest, removed: &[&str]) {
    let mut targets: BTreeSet<String> = removed.iter().map(|p| p.to_string()).collect();
    match index.indexed_paths().await {
        Ok(paths) => targets.extend(
            paths
                .into_iter()
                .filter(|p| !manifest.get(p).is_some_and(|e| e.is_present())),
        ),
        Err(e) => tracing::warn!(error = %e, "could not read indexed paths; pruning removed paths only"),
    }
    for path in targets {
        match index.remove(&path).await {
            Ok(n) => tracing::info!(path = %path, chunks = n, "removed from index"),
            Err(e) => tracing::warn!(path = %path, error = %e, "failed to remove from index"),
        }
    }
}

/// Read the status written by the last run, if any.
pub async fn read_status(path: &Path) -> Result<Option<SyncStatus>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
