//! File access confined to the sandbox workspace.
//!
//! Paths are checked twice: lexically before anything reaches the backend,
//! then again after the backend resolves symbolic links.

use std::sync::Arc;

use codemode_core::fs_policy;
use codemode_core::{Error, Result};

use crate::engine::{DirEntry, SandboxEngine};
use crate::pool::{ReleaseOutcome, SandboxLease, SandboxPool};

#[derive(Clone)]
pub struct FileGateway {
    engine: Arc<dyn SandboxEngine>,
    root: String,
}

impl FileGateway {
    pub fn new(engine: Arc<dyn SandboxEngine>, root: impl Into<String>) -> Self {
        Self {
            engine,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Lexically resolve `raw` against the workspace root.
    pub fn resolve(&self, raw: &str) -> Result<String> {
        fs_policy::resolve(raw, &self.root)
    }

    /// Resolve, then follow links inside the sandbox and check the target again.
    async fn confine(&self, lease: &SandboxLease, raw: &str) -> Result<String> {
        let resolved = self.resolve(raw)?;
        let real = self.engine.real_path(lease.id(), &resolved).await?;
        if fs_policy::ensure_within(&real, &self.root).is_err() {
            tracing::warn!(path = %resolved, target = %real, "Link points outside the workspace");
            return Err(Error::path_escape(raw, &self.root));
        }
        Ok(real)
    }

    pub async fn read(&self, lease: &SandboxLease, raw: &str) -> Result<Vec<u8>> {
        let path = self.confine(lease, raw).await?;
        self.engine.read_file(lease.id(), &path).await
    }

    /// Write `content`, creating parent directories. Returns the resolved path.
    pub async fn write(&self, lease: &SandboxLease, raw: &str, content: &[u8]) -> Result<String> {
        let path = self.confine(lease, raw).await?;
        self.engine.write_file(lease.id(), &path, content).await?;
        Ok(path)
    }

    pub async fn list(&self, lease: &SandboxLease, raw: &str) -> Result<Vec<DirEntry>> {
        let path = self.confine(lease, raw).await?;
        self.engine.list_dir(lease.id(), &path).await
    }

    /// Remove everything under the workspace root.
    pub async fn reset(&self, lease: &SandboxLease) -> Result<()> {
        self.engine.clear_dir(lease.id(), &self.root).await
    }
}

/// A file read together with the path it resolved to.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub path: String,
    pub content: Vec<u8>,
}

/// A directory listing together with the path it resolved to.
#[derive(Debug, Clone)]
pub struct DirListing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

// =============================================================================
// Pool-level file operations
// =============================================================================

impl SandboxPool {
    pub fn file_gateway(&self) -> &FileGateway {
        &self.files
    }

    /// Read a file from an idle sandbox.
    #[tracing::instrument(skip(self))]
    pub async fn read_file(&self, path: &str) -> Result<FileContent> {
        let resolved = self.files.resolve(path)?;
        let lease = self.acquire_default().await?;
        let result = self.files.read(&lease, path).await;
        self.release(lease, ReleaseOutcome::of(&result)).await;
        Ok(FileContent {
            path: resolved,
            content: result?,
        })
    }

    /// Write a file in an idle sandbox. Returns the resolved path.
    #[tracing::instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<String> {
        self.files.resolve(path)?;
        let lease = self.acquire_default().await?;
        let result = self.files.write(&lease, path, content).await;
        self.release(lease, ReleaseOutcome::of(&result)).await;
        result
    }

    /// List a directory; `None` lists the workspace root.
    #[tracing::instrument(skip(self))]
    pub async fn list_files(&self, path: Option<&str>) -> Result<DirListing> {
        let raw = path.unwrap_or(self.files.root());
        let resolved = self.files.resolve(raw)?;
        let lease = self.acquire_default().await?;
        let result = self.files.list(&lease, raw).await;
        self.release(lease, ReleaseOutcome::of(&result)).await;
        Ok(DirListing {
            path: resolved,
            entries: result?,
        })
    }

    /// Wipe the workspace of the sandbox behind `lease`.
    ///
    /// A failed wipe leaves unknown state behind, so the caller should
    /// release the lease as compromised.
    pub async fn reset_workspace(&self, lease: &SandboxLease) -> Result<()> {
        self.files.reset(lease).await.map_err(|e| {
            tracing::warn!(sandbox = %lease.id(), error = %e, "Workspace reset failed");
            Error::environment(format!("Workspace reset failed: {}", e))
        })
    }
}
