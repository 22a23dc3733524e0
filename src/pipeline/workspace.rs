use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::Result;

/// Name prefix of every job workspace under the scratch root
pub const SCRATCH_PREFIX: &str = "reelstitch-job-";

/// Job-scoped directory for downloads and intermediate files.
///
/// The directory is removed when the workspace is closed or dropped, so a
/// cancelled or timed-out job cleans up as well. Removal failures are logged
/// and never replace the job's own result.
pub struct ScratchWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchWorkspace {
    /// Create a uniquely named workspace under `root`
    pub fn create(root: &Path, job_id: Uuid) -> Result<Self> {
        fs::create_dir_all(root)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", SCRATCH_PREFIX, job_id.simple()))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();

        debug!("Created scratch workspace {}", path.display());
        Ok(Self { dir: Some(dir), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the workspace now
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("Removed scratch workspace {}", self.path.display()),
                Err(e) => warn!("Failed to remove scratch workspace {}: {}", self.path.display(), e),
            }
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Remove workspaces nothing has written to for at least `idle_for`.
///
/// Live workspaces of other processes sharing `root` keep getting fresh
/// modification times from downloads and encodes, so they are left alone.
pub fn purge_stale(root: &Path, idle_for: Duration) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        let is_workspace = entry.file_type().is_dir()
            && entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX);
        if !is_workspace {
            continue;
        }

        let idle = last_activity(entry.path())
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or_default();
        if idle < idle_for {
            debug!("Keeping active workspace {}", entry.path().display());
            continue;
        }

        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale workspace {}: {}", entry.path().display(), e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale scratch workspace(s) from {}", removed, root.display());
    }
    Ok(removed)
}

/// Newest modification time of the workspace or anything inside it
fn last_activity(workspace: &Path) -> Option<SystemTime> {
    WalkDir::new(workspace)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok()?.modified().ok())
        .max()
}
