//! Disposable per-request working directories
//!
//! A [`Workspace`] is created empty at the start of a pipeline and removed at
//! the end on every path. `release` reports nothing to the caller: a failed
//! removal is logged and the pipeline's own outcome stands. If a workspace is
//! dropped without `release` (a panic, a cancelled future) the directory is
//! still removed, silently.

use crate::config::WorkspaceConfig;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: Option<PathBuf>,
    prefix: String,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.root.clone(),
            prefix: config.prefix.clone(),
        }
    }

    /// Create a fresh, empty, uniquely named directory.
    pub fn acquire(&self) -> Result<Workspace, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(PipelineError::WorkspaceUnavailable)?;

        tracing::debug!(path = %dir.path().display(), "workspace acquired");
        Ok(Workspace { dir })
    }
}

/// Exclusively owned working directory for one request.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory and everything in it. Consumes the workspace, so
    /// it runs at most once.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "workspace removed"),
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to remove workspace"
            ),
        }
    }
}
