//! Temp artifact staging
//!
//! Every job stages its artifact in an isolated directory under one
//! configured root, named after the sanitized job id so no two jobs can
//! collide. Cleanup is explicit and idempotent, with a drop backstop so a
//! panicking task still releases its disk space, and a startup sweep
//! reclaims directories orphaned by an earlier unclean exit.

use crate::error::Result;
use crate::types::JobId;
use crate::utils::sanitize_component;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// File name of the staged artifact inside a job directory
const ARTIFACT_FILE_NAME: &str = "artifact.bin";

/// Manages the staging root
pub struct TempFileManager {
    root: PathBuf,
    orphan_grace: Duration,
}

impl TempFileManager {
    /// Creates the manager, creating the staging root if needed
    pub async fn new(root: impl Into<PathBuf>, orphan_grace: Duration) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root, orphan_grace })
    }

    /// The staging root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates an isolated staging directory for `job_id`
    pub async fn allocate(&self, job_id: &JobId) -> Result<TempArtifact> {
        let dir = self.root.join(sanitize_component(job_id.as_str()));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(ARTIFACT_FILE_NAME);
        tracing::debug!(%job_id, path = %path.display(), "Allocated staging directory");
        Ok(TempArtifact {
            job_id: job_id.clone(),
            dir,
            path,
            committed: AtomicBool::new(false),
            cleaned: AtomicBool::new(false),
        })
    }

    /// Removes staging directories older than the orphan grace period
    ///
    /// Meant for startup, before any job is running; a zero grace period
    /// reclaims everything present. Entries that cannot be inspected or
    /// removed are logged and skipped. Returns how many directories were
    /// reclaimed.
    pub async fn sweep_orphans(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable entry during orphan sweep");
                    continue;
                }
            };
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok());
            match age {
                Some(age) if age >= self.orphan_grace => {
                    match tokio::fs::remove_dir_all(&path).await {
                        Ok(()) => {
                            removed += 1;
                            tracing::info!(path = %path.display(), age_secs = age.as_secs(), "Reclaimed orphaned staging directory");
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned staging directory");
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(removed)
    }
}

/// Handle to one job's staging directory
///
/// The handle starts as a path reservation; [`finalize`](TempArtifact::finalize)
/// commits the staged bytes once the download has written them. The
/// directory lives until [`cleanup`](TempArtifact::cleanup) is called;
/// dropping an uncleaned handle removes it best-effort as a backstop.
pub struct TempArtifact {
    job_id: JobId,
    dir: PathBuf,
    path: PathBuf,
    committed: AtomicBool,
    cleaned: AtomicBool,
}

impl TempArtifact {
    /// Path the artifact should be written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Job this staging directory belongs to
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Commits the staged bytes for upload, returning their size
    ///
    /// Fails when nothing is staged at the artifact path. The size it
    /// returns is the authoritative input to transport selection.
    pub async fn finalize(&self) -> Result<u64> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        let size = metadata.len();
        self.committed.store(true, Ordering::SeqCst);
        tracing::debug!(job_id = %self.job_id, size_bytes = size, "Artifact committed for upload");
        Ok(size)
    }

    /// Whether [`finalize`](TempArtifact::finalize) has committed the artifact
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// Removes the staging directory and everything in it
    ///
    /// Safe to call any number of times; an already-removed directory is
    /// success, and a failed removal may be retried.
    pub async fn cleanup(&self) -> Result<()> {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, "Removed staging directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                // Leave the flag unset so a later attempt can retry
                self.cleaned.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.cleaned.load(Ordering::SeqCst) {
            // Backstop only; the normal path is an explicit cleanup() call
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}
