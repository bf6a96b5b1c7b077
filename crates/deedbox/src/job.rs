//! The sync job: one reconciler run followed by index maintenance.
//!
//! Shared by `deedbox sync` and the periodic task inside `deedbox serve`.

use std::collections::BTreeSet;

use deedbox_core::models::SyncStatus;
use deedbox_core::Result;
use serde::Serialize;

use crate::retrieval::RetrievalService;
use crate::sync::SyncReconciler;

/// Summary of one job: the sync status plus what the indexer did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub indexed: usize,
    pub index_failures: usize,
}

/// Run the reconciler, then (re)index every changed path and every
/// `PRESENT` path that has no chunks yet.
///
/// Indexing failures are logged and picked up again by the next run; they
/// never change the recorded sync status.
pub async fn run_sync_job(
    reconciler: &SyncReconciler,
    retrieval: Option<&RetrievalService>,
) -> Result<SyncReport> {
    let run = reconciler.run().await?;
    let mut report = SyncReport {
        status: run.status,
        indexed: 0,
        index_failures: 0,
    };

    let Some(retrieval) = retrieval else {
        return Ok(report);
    };

    let indexed: BTreeSet<String> = match retrieval.indexed_documents().await {
        Ok(paths) => paths.into_iter().collect(),
        Err(e) => {
            tracing::warn!(error = %e, "could not read index; skipping post-sync indexing");
            return Ok(report);
        }
    };

    let mut pending: BTreeSet<String> = run.changed.into_iter().collect();
    pending.extend(
        run.manifest
            .present_paths()
            .filter(|p| !indexed.contains(*p))
            .map(str::to_string),
    );

    for path in &pending {
        match retrieval.index_document(path).await {
            Ok(_) => report.indexed += 1,
            Err(e) => {
                report.index_failures += 1;
                tracing::warn!(path = %path, error = %e, "post-sync indexing failed");
            }
        }
    }
    tracing::info!(
        indexed = report.indexed,
        failed = report.index_failures,
        "post-sync indexing finished"
    );
    Ok(report)
}
