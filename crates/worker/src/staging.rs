//! Per-job file bookkeeping.
//!
//! Every file a job writes or reads back is registered with the job's
//! [`CleanupGuard`] before it is touched. Dropping the guard removes all of
//! them, so cleanup runs on every exit path of a job, including early
//! returns and panics.

use std::path::{Path, PathBuf};
use std::time::Instant;

use uuid::Uuid;

use headswap_core::error::CoreError;

/// Removes registered paths on drop. Removal errors are logged, never raised.
#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

// Blocking removal: `Drop` cannot await, and a job owns only a few files.
impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed job file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove job file");
                }
            }
        }
    }
}

/// Identity and owned files of one job.
#[derive(Debug)]
pub struct JobContext {
    pub job_id: Uuid,
    pub started: Instant,
    cleanup: CleanupGuard,
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            started: Instant::now(),
            cleanup: CleanupGuard::new(),
        }
    }

    /// Job-unique file name, e.g. `head_<uuid>.png`.
    pub fn staged_name(&self, role: &str) -> String {
        format!("{role}_{}.png", self.job_id)
    }

    /// Write `bytes` to `dir/name`, registering the path first so a partial
    /// write is removed as well.
    pub async fn stage(&mut self, dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CoreError::io(dir, e))?;
        let path = dir.join(name);
        self.cleanup.register(&path);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        Ok(path)
    }

    /// Take ownership of a file created by someone else (the backend's output).
    pub fn adopt(&mut self, path: impl Into<PathBuf>) {
        self.cleanup.register(path);
    }

    pub fn owned_paths(&self) -> &[PathBuf] {
        self.cleanup.paths()
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_files_on_drop_and_ignores_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.png");
        std::fs::write(&present, b"x").unwrap();

        {
            let mut guard = CleanupGuard::new();
            guard.register(&present);
            guard.register(dir.path().join("never-written.png"));
        }

        assert!(!present.exists());
    }

    #[tokio::test]
    async fn staged_files_are_job_unique_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut ctx = JobContext::new();
            let name = ctx.staged_name("head");
            assert!(name.contains(&ctx.job_id.to_string()));
            let path = ctx.stage(dir.path(), &name, b"png").await.unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"png");
            assert_eq!(ctx.owned_paths(), &[path.clone()]);
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn two_jobs_never_share_a_name() {
        let a = JobContext::new();
        let b = JobContext::new();
        assert_ne!(a.staged_name("body"), b.staged_name("body"));
    }

    #[test]
    fn cleanup_runs_when_a_job_panics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.png");
        std::fs::write(&path, b"x").unwrap();

        let moved = path.clone();
        let result = std::panic::catch_unwind(move || {
            let mut guard = CleanupGuard::new();
            guard.register(moved);
            panic!("job blew up");
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
