//! Scratch directories for a single operation.

use crate::error::SnapshotResult;
use std::path::{Path, PathBuf};
use strongbox_common::LoggingTransformer;
use tempfile::TempDir;

/// Hands out uniquely named scratch directories under one root.
#[derive(Debug, Clone)]
pub struct TempWorkspaceManager {
    root: PathBuf,
}

impl TempWorkspaceManager {
    /// Manager for directories under `root`, created on first use
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Parent of every workspace
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory named `<label>-<random>`
    pub async fn allocate(&self, label: &str) -> SnapshotResult<TempWorkspace> {
        tokio::fs::create_dir_all(&self.root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(&self.root)?;
        log::debug!("Allocated workspace {}", dir.path().display());
        Ok(TempWorkspace {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }
}

/// A scratch directory removed with everything inside it.
///
/// Call [`cleanup`](TempWorkspace::cleanup) on every exit path; dropping
/// the workspace removes it too, but without reporting failures.
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl TempWorkspace {
    /// Workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `name` inside the workspace
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory tree. Failures are logged, never returned, so
    /// they cannot mask the result of the operation itself.
    pub async fn cleanup(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => log::debug!("Removed workspace {}", path.display()),
            Ok(Err(e)) => LoggingTransformer::log_cleanup_warning(&path, &e),
            Err(e) => LoggingTransformer::log_cleanup_warning(&path, &e),
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.dir.is_some() {
            log::debug!("Workspace {} dropped without cleanup", self.path.display());
        }
    }
}
