//! Pure sync planning: diff a remote listing against the manifest, then fold
//! per-file outcomes into a new manifest snapshot.
//!
//! Nothing here touches the network or disk. The app crate's reconciler
//! executes the plan (downloads, local deletions) and hands the outcomes
//! back to [`apply_outcomes`], which never mutates its input manifest.
//!
//! # Classification
//!
//! | Remote | Manifest entry                              | Action  |
//! |--------|---------------------------------------------|---------|
//! | yes    | none, or `DELETED`                          | added   |
//! | yes    | changed, `PENDING_DOWNLOAD`, or file missing | updated |
//! | yes    | `PRESENT`, unchanged, file on disk          | none    |
//! | no     | `PRESENT` or `PENDING_DOWNLOAD`             | deleted |
//! | no     | `DELETED`                                   | none    |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{FileFailure, LocalState, Manifest, ManifestEntry, RemoteEntry, SyncStatus};

/// File operations one run must perform. Each list is sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub added: Vec<RemoteEntry>,
    pub updated: Vec<RemoteEntry>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl SyncPlan {
    /// Entries that need a download, new files first.
    pub fn downloads(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.added.iter().chain(self.updated.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Classify every path. `local_exists` reports whether the local copy of a
/// path is on disk; a `PRESENT` entry without one is re-downloaded.
///
/// Duplicate paths in `remote` collapse to the last occurrence.
pub fn plan_sync(
    remote: &[RemoteEntry],
    manifest: &Manifest,
    local_exists: impl Fn(&str) -> bool,
) -> SyncPlan {
    let remote_by_path: BTreeMap<&str, &RemoteEntry> =
        remote.iter().map(|r| (r.path.as_str(), r)).collect();

    let mut plan = SyncPlan::default();
    for (path, entry) in &remote_by_path {
        match manifest.get(*path) {
            None => plan.added.push((*entry).clone()),
            Some(m) if m.local_state == LocalState::Deleted => plan.added.push((*entry).clone()),
            Some(m) => {
                let stale = entry.differs_from(m)
                    || m.local_state == LocalState::PendingDownload
                    || !local_exists(*path);
                if stale {
                    plan.updated.push((*entry).clone());
                } else {
                    plan.unchanged += 1;
                }
            }
        }
    }

    plan.deleted = manifest
        .iter()
        .filter(|(path, e)| {
            e.local_state != LocalState::Deleted && !remote_by_path.contains_key(path.as_str())
        })
        .map(|(path, _)| path.clone())
        .collect();

    plan
}

/// Result of one planned file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
}

/// New manifest snapshot plus the counts that go into [`SyncStatus`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub manifest: Manifest,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub files_failed: Vec<FileFailure>,
}

impl Reconciled {
    pub fn succeeded(&self) -> usize {
        self.files_added + self.files_updated + self.files_deleted
    }

    pub fn into_status(self, started: DateTime<Utc>, finished: DateTime<Utc>) -> SyncStatus {
        let overall_status = SyncStatus::overall(self.succeeded(), self.files_failed.len());
        SyncStatus {
            run_started_at: started,
            run_finished_at: finished,
            files_added: self.files_added,
            files_updated: self.files_updated,
            files_deleted: self.files_deleted,
            files_failed: self.files_failed,
            overall_status,
        }
    }
}

/// Fold outcomes into a copy of `manifest`.
///
/// - added + done: new `PRESENT` entry.
/// - updated + done: entry overwritten with the remote metadata.
/// - deleted + done: entry kept, `local_state = DELETED`.
/// - any failure: entry left exactly as it was (absent for new paths).
///
/// A planned path with no outcome counts as failed.
pub fn apply_outcomes(
    manifest: &Manifest,
    plan: &SyncPlan,
    outcomes: &BTreeMap<String, Outcome>,
) -> Reconciled {
    let mut next = manifest.clone();
    let mut files_failed = Vec::new();
    let (mut files_added, mut files_updated, mut files_deleted) = (0, 0, 0);

    let settle = |path: &str, failed: &mut Vec<FileFailure>| -> bool {
        match outcomes.get(path) {
            Some(Outcome::Done) => true,
            Some(Outcome::Failed(error)) => {
                failed.push(FileFailure {
                    path: path.to_string(),
                    error: error.clone(),
                });
                false
            }
            None => {
                failed.push(FileFailure {
                    path: path.to_string(),
                    error: "operation did not complete".to_string(),
                });
                false
            }
        }
    };

    for entry in &plan.added {
        if settle(&entry.path, &mut files_failed) {
            next.insert(entry.path.clone(), ManifestEntry::present(entry));
            files_added += 1;
        }
    }
    for entry in &plan.updated {
        if settle(&entry.path, &mut files_failed) {
            next.insert(entry.path.clone(), ManifestEntry::present(entry));
            files_updated += 1;
        }
    }
    for path in &plan.deleted {
        if settle(path, &mut files_failed) {
            if let Some(e) = next.get_mut(path) {
                e.local_state = LocalState::Deleted;
            }
            files_deleted += 1;
        }
    }

    Reconciled {
        manifest: next,
        files_added,
        files_updated,
        files_deleted,
        files_failed,
    }
}
