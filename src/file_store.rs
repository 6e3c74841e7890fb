//! Tenant-isolated document storage.
//!
//! Each tenant gets one directory under a configured root. Operations on a
//! tenant's files go through a [`TenantFiles`] handle obtained from the
//! store, so call sites never juggle bare tenant IDs against raw paths.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::models::TenantId;

pub struct TenantFileStore {
    root: PathBuf,
}

impl TenantFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        TenantFileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the handle for one tenant's directory, creating it if absent.
    /// The caller is expected to have already authenticated the request
    /// against this tenant.
    pub async fn tenant(&self, tenant: &TenantId) -> Result<TenantFiles> {
        let dir = self.root.join(tenant.as_str());
        fs::create_dir_all(&dir).await?;
        Ok(TenantFiles {
            tenant: tenant.clone(),
            dir,
        })
    }
}

/// Capability handle scoped to a single tenant's upload directory.
pub struct TenantFiles {
    tenant: TenantId,
    dir: PathBuf,
}

impl TenantFiles {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generates a collision-resistant filename that carries no information
    /// about the original name and is safe to place directly on the
    /// filesystem: `"<file_type>_<fingerprint>_<token prefix><ext>"`.
    pub fn secure_filename(&self, original_filename: &str, file_type: &str) -> String {
        let ext = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".xml".to_string());

        let token = Uuid::new_v4().to_string();
        let digest = Sha256::digest(format!("{}_{}_{}", self.tenant, file_type, token).as_bytes());
        let fingerprint: String = digest.iter().map(|b| format!("{b:02x}")).take(6).collect();

        format!("{}_{}_{}{}", file_type, fingerprint, &token[..8], ext)
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Validates that a candidate path resolves inside this tenant's
    /// directory, rejecting traversal sequences and symlink escapes. Returns
    /// the canonical path on success; fails closed otherwise.
    pub async fn validate_access(&self, candidate: &Path) -> Result<PathBuf> {
        let tenant_dir = fs::canonicalize(&self.dir).await.map_err(|e| {
            PolicyError::access(format!("cannot resolve tenant directory: {e}"))
        })?;

        // The candidate may not exist yet (e.g. an upload target); resolve
        // its parent and re-attach the file name in that case.
        let resolved = match fs::canonicalize(candidate).await {
            Ok(path) => path,
            Err(_) => {
                let parent = candidate
                    .parent()
                    .ok_or_else(|| PolicyError::access("invalid file path"))?;
                let name = candidate
                    .file_name()
                    .ok_or_else(|| PolicyError::access("invalid file path"))?;
                let parent = fs::canonicalize(parent)
                    .await
                    .map_err(|e| PolicyError::access(format!("invalid file path: {e}")))?;
                parent.join(name)
            }
        };

        if resolved == tenant_dir || !resolved.starts_with(&tenant_dir) {
            return Err(PolicyError::access(format!(
                "file access outside tenant {} directory not allowed",
                self.tenant
            )));
        }

        Ok(resolved)
    }

    /// Stores a document under this tenant's directory with a generated
    /// filename and applies the retention policy for that file type. Returns
    /// the stored path.
    pub async fn store_document(
        &self,
        file_type: &str,
        content: &str,
        keep_latest: bool,
    ) -> Result<PathBuf> {
        let name = self.secure_filename("export.xml", file_type);
        let path = self.validate_access(&self.file_path(&name)).await?;
        fs::write(&path, content).await?;
        self.cleanup_old_files(file_type, keep_latest).await?;
        Ok(path)
    }

    /// Deletes old files of one type, keeping the most recent when
    /// `keep_latest` is set. Per-file delete failures are logged and skipped.
    /// Returns the number of files actually deleted.
    pub async fn cleanup_old_files(&self, file_type: &str, keep_latest: bool) -> Result<usize> {
        let prefix = format!("{file_type}_");
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            files.push((entry.path(), metadata.modified()?));
        }

        // Newest first.
        files.sort_by(|a, b| b.1.cmp(&a.1));
        let to_delete = if keep_latest && !files.is_empty() {
            &files[1..]
        } else {
            &files[..]
        };

        let mut deleted = 0;
        for (path, _) in to_delete {
            match fs::remove_file(path).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete file");
                }
            }
        }

        debug!(tenant = %self.tenant, file_type, deleted, "cleanup complete");
        Ok(deleted)
    }
}
