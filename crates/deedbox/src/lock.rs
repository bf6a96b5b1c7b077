//! Run-level lock for the sync job.
//!
//! A lock file created with `create_new` marks a run in progress. It holds
//! the owner's pid and start time for operators and is removed when the
//! [`RunLock`] guard drops. A lock file older than [`STALE_AFTER`] is
//! assumed to belong to a crashed run and is taken over.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use deedbox_core::{Error, Result};

pub const STALE_AFTER: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail fast with [`Error::AlreadyRunning`].
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut f) => {
                    writeln!(
                        f,
                        "pid={} started_at={}",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    )?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !is_stale(path) {
                        return Err(Error::AlreadyRunning(format!(
                            "lock file {} exists",
                            path.display()
                        )));
                    }
                    tracing::warn!(lock = %path.display(), "taking over stale sync lock");
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::AlreadyRunning(format!(
            "lock file {} was re-created by another run",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release sync lock");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_AFTER)
}
