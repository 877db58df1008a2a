//! Per-backend overrides of a few adapter operations.
//!
//! Backends disagree on the cheap way to answer "does this exist" or "is
//! this a directory". A patch is chosen once from the client's
//! [`BackendKind`] when the adapter is built. Every method defaults to the
//! adapter's shared `origin_*` implementation, so a patch overrides only what
//! differs and can still delegate to the default.

use async_trait::async_trait;
use tracing::{debug, warn};

use storagefs_common::backend::{BackendKind, StorageError};

use crate::error::{VfsError, VfsResult};
use crate::fs::StorageFs;
use crate::path::has_dir_marker;
use crate::stat::PseudoStat;

#[async_trait]
pub trait StoragePatch: Send + Sync {
    fn name(&self) -> &'static str;

    async fn exists(&self, fs: &StorageFs, path: &str) -> bool {
        fs.origin_exists(path).await
    }

    async fn is_dir(&self, fs: &StorageFs, path: &str) -> bool {
        fs.origin_is_dir(path).await
    }

    async fn getmtime(&self, fs: &StorageFs, path: &str) -> i64 {
        fs.origin_getmtime(path).await
    }

    async fn listdir(&self, fs: &StorageFs, path: &str) -> VfsResult<Vec<String>> {
        fs.origin_listdir(path).await
    }

    async fn mkdir(&self, fs: &StorageFs, path: &str) -> VfsResult<()> {
        fs.origin_mkdir(path).await
    }

    async fn rmdir(&self, fs: &StorageFs, path: &str) -> VfsResult<()> {
        fs.origin_rmdir(path).await
    }

    async fn stat(&self, fs: &StorageFs, path: &str) -> VfsResult<PseudoStat> {
        fs.origin_stat(path).await
    }
}

/// Select the patch for a storage client.
pub fn select(kind: BackendKind) -> Box<dyn StoragePatch> {
    match kind {
        BackendKind::Directory => Box::new(FileSystemPatch),
        BackendKind::S3 => Box::new(S3Patch),
        BackendKind::Gcs => Box::new(GcsPatch),
        BackendKind::Memory => Box::new(DefaultPatch),
    }
}

/// No overrides: directories are marker objects.
pub struct DefaultPatch;

#[async_trait]
impl StoragePatch for DefaultPatch {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Disk-backed storage: directories are real, so use the native primitives.
pub struct FileSystemPatch;

#[async_trait]
impl StoragePatch for FileSystemPatch {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn mkdir(&self, fs: &StorageFs, path: &str) -> VfsResult<()> {
        let vpath = fs.virtual_path(path);
        let key = fs.storage_key(path);
        let Some(local) = fs.storage().local_path(&key) else {
            return fs.origin_mkdir(path).await;
        };
        if key.is_empty() {
            return Err(VfsError::unsupported(format!("mkdir {}", vpath)));
        }
        tokio::fs::create_dir_all(&local).await.map_err(|e| {
            warn!(path = %vpath, error = %e, "mkdir failed");
            VfsError::CreateDirectory {
                path: vpath.clone(),
                source: StorageError::Io(e),
            }
        })?;
        debug!(path = %vpath, "Directory created");
        Ok(())
    }

    async fn rmdir(&self, fs: &StorageFs, path: &str) -> VfsResult<()> {
        let vpath = fs.virtual_path(path);
        let key = fs.storage_key(path);
        let Some(local) = fs.storage().local_path(&key) else {
            return fs.origin_rmdir(path).await;
        };
        if key.is_empty() {
            return Err(VfsError::unsupported(format!("rmdir {}", vpath)));
        }
        tokio::fs::remove_dir(&local).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                return VfsError::not_found(vpath.clone());
            }
            warn!(path = %vpath, error = %e, "rmdir failed");
            VfsError::RemoveDirectory {
                path: vpath.clone(),
                source: StorageError::Io(e),
            }
        })?;
        debug!(path = %vpath, "Directory removed");
        Ok(())
    }

    async fn stat(&self, fs: &StorageFs, path: &str) -> VfsResult<PseudoStat> {
        let vpath = fs.virtual_path(path);
        let Some(local) = fs.storage().local_path(&fs.storage_key(path)) else {
            return fs.origin_stat(path).await;
        };
        match tokio::fs::metadata(&local).await {
            Ok(meta) => Ok(PseudoStat::from_metadata(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VfsError::not_found(vpath)),
            Err(e) => Err(VfsError::Io(e)),
        }
    }
}

/// S3 has no reliable existence answer for marker keys and no directories.
pub struct S3Patch;

#[async_trait]
impl StoragePatch for S3Patch {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn exists(&self, fs: &StorageFs, path: &str) -> bool {
        if has_dir_marker(path) {
            return true;
        }
        fs.origin_exists(path).await
    }

    async fn is_dir(&self, fs: &StorageFs, path: &str) -> bool {
        prefix_is_dir(fs, path).await
    }

    async fn getmtime(&self, fs: &StorageFs, path: &str) -> i64 {
        prefix_mtime(fs, path).await
    }
}

/// GCS has the same gaps as S3. Listing needs no override: the shared
/// listing already queries the `/`-terminated prefix.
pub struct GcsPatch;

#[async_trait]
impl StoragePatch for GcsPatch {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn exists(&self, fs: &StorageFs, path: &str) -> bool {
        if has_dir_marker(path) {
            return true;
        }
        fs.origin_exists(path).await
    }

    async fn is_dir(&self, fs: &StorageFs, path: &str) -> bool {
        prefix_is_dir(fs, path).await
    }

    async fn getmtime(&self, fs: &StorageFs, path: &str) -> i64 {
        prefix_mtime(fs, path).await
    }
}

/// Not a file, and something lives under the prefix.
async fn prefix_is_dir(fs: &StorageFs, path: &str) -> bool {
    if fs.is_file(path).await {
        return false;
    }
    fs.has_prefix(path).await
}

/// Directories have no modification time; skip the backend for them.
async fn prefix_mtime(fs: &StorageFs, path: &str) -> i64 {
    if has_dir_marker(path) || fs.is_dir(path).await {
        return 0;
    }
    fs.file_mtime(path).await
}
