//! The filesystem adapter.
//!
//! [`StorageFs`] answers filesystem-shaped queries from a file-transfer
//! protocol handler against a [`StorageClient`]. One instance per
//! connection: the current directory is private state and nothing is shared
//! or cached between calls.
//!
//! Operations that differ per backend go through the [`StoragePatch`]
//! selected at construction. The `origin_*` methods are the shared default
//! implementations a patch falls back to.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use storagefs_common::backend::{StorageClient, StorageError};
use storagefs_common::config::FsOptions;

use crate::error::{VfsError, VfsResult};
use crate::file::{OpenMode, StorageFile};
use crate::key::{dir_marker, entry_name, KeyTranslator};
use crate::patch::{self, StoragePatch};
use crate::path::{has_dir_marker, PathNormalizer, ROOT};
use crate::stat::{PseudoStat, GROUP_NAME, OWNER_NAME};

pub struct StorageFs {
    storage: Arc<dyn StorageClient>,
    patch: Box<dyn StoragePatch>,
    normalizer: PathNormalizer,
    keys: KeyTranslator,
    cwd: String,
}

impl StorageFs {
    pub fn new(storage: Arc<dyn StorageClient>, options: FsOptions) -> Self {
        let patch = patch::select(storage.kind());
        debug!(backend = %storage.kind(), patch = patch.name(), "Storage patch selected");
        Self {
            storage,
            patch,
            normalizer: PathNormalizer::new(options.root),
            keys: KeyTranslator::new(options.media_root_basename),
            cwd: ROOT.to_string(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    pub fn patch_name(&self) -> &'static str {
        self.patch.name()
    }

    // ── Paths ──

    /// Canonical virtual path of a path expression.
    pub fn virtual_path(&self, path: &str) -> String {
        self.normalizer.normalize(path, &self.cwd)
    }

    /// Storage key of a path expression. An explicit trailing separator on
    /// the input survives as the directory marker.
    pub fn storage_key(&self, path: &str) -> String {
        let key = self.keys.to_key(&self.virtual_path(path));
        if has_dir_marker(path) && !key.is_empty() {
            dir_marker(&key)
        } else {
            key
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn chdir(&mut self, path: &str) {
        self.cwd = self.virtual_path(path);
        debug!(cwd = %self.cwd, "Changed directory");
    }

    pub fn realpath(&self, path: &str) -> String {
        self.virtual_path(path)
    }

    /// Physical location of a path under the configured root.
    pub fn to_physical(&self, path: &str) -> Option<PathBuf> {
        self.normalizer.to_physical(&self.virtual_path(path))
    }

    // ── Queries ──

    /// Never fails; backend errors read as "absent".
    pub async fn exists(&self, path: &str) -> bool {
        self.patch.exists(self, path).await
    }

    pub async fn lexists(&self, path: &str) -> bool {
        self.exists(path).await
    }

    pub async fn is_file(&self, path: &str) -> bool {
        if path.is_empty() || has_dir_marker(path) {
            return false;
        }
        let vpath = self.virtual_path(path);
        if vpath == ROOT || self.keys.to_key(&vpath).is_empty() {
            return false;
        }
        self.exists(path).await
    }

    pub async fn is_dir(&self, path: &str) -> bool {
        self.patch.is_dir(self, path).await
    }

    pub fn is_link(&self, _path: &str) -> bool {
        false
    }

    pub async fn getsize(&self, path: &str) -> VfsResult<u64> {
        if self.is_dir(path).await {
            return Ok(0);
        }
        let key = self.storage_key(path);
        self.storage
            .size(&key)
            .await
            .map_err(|e| VfsError::storage(self.virtual_path(path), e))
    }

    /// Epoch seconds; 0 for directories and whenever the backend cannot say.
    pub async fn getmtime(&self, path: &str) -> i64 {
        self.patch.getmtime(self, path).await
    }

    pub async fn stat(&self, path: &str) -> VfsResult<PseudoStat> {
        self.patch.stat(self, path).await
    }

    /// No links exist, so this is [`StorageFs::stat`].
    pub async fn lstat(&self, path: &str) -> VfsResult<PseudoStat> {
        self.stat(path).await
    }

    pub async fn listdir(&self, path: &str) -> VfsResult<Vec<String>> {
        self.patch.listdir(self, path).await
    }

    /// Listing with a stat record per entry. Per-file metadata errors
    /// degrade to 0 instead of failing the listing.
    pub async fn list_directory_info(&self, path: &str) -> VfsResult<Vec<(String, PseudoStat)>> {
        let vpath = self.virtual_path(path);
        let names = self.listdir(path).await?;
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if name.ends_with('/') {
                entries.push((name, PseudoStat::directory()));
                continue;
            }
            let child = if vpath == ROOT {
                format!("/{}", name)
            } else {
                format!("{}/{}", vpath, name)
            };
            let key = self.storage_key(&child);
            let size = match self.storage.size(&key).await {
                Ok(size) => size,
                Err(e) => {
                    debug!(key = %key, error = %e, "Size lookup failed, reporting 0");
                    0
                }
            };
            let mtime = self.file_mtime(&child).await;
            entries.push((name, PseudoStat::file(size, mtime)));
        }
        Ok(entries)
    }

    pub fn owner_name(&self, _uid: u32) -> &'static str {
        OWNER_NAME
    }

    pub fn group_name(&self, _gid: u32) -> &'static str {
        GROUP_NAME
    }

    // ── Mutations ──

    pub async fn open(&self, path: &str, mode: &str) -> VfsResult<StorageFile> {
        let mode = OpenMode::parse(mode)?;
        let vpath = self.virtual_path(path);
        let key = self.storage_key(path);
        if key.is_empty() || key.ends_with('/') {
            return Err(VfsError::unsupported(format!("open directory {}", vpath)));
        }
        StorageFile::open(self.storage.clone(), key, vpath, mode).await
    }

    pub async fn mkdir(&self, path: &str) -> VfsResult<()> {
        self.patch.mkdir(self, path).await
    }

    pub async fn rmdir(&self, path: &str) -> VfsResult<()> {
        self.patch.rmdir(self, path).await
    }

    /// Delete a file. Fails with not-found when there is no such file, even
    /// on stores whose delete is idempotent.
    pub async fn remove(&self, path: &str) -> VfsResult<()> {
        let vpath = self.virtual_path(path);
        if !self.is_file(path).await {
            return Err(VfsError::not_found(vpath));
        }
        let key = self.storage_key(path);
        self.storage.delete(&key).await.map_err(|e| {
            warn!(key = %key, error = %e, "Delete failed");
            VfsError::storage(vpath.clone(), e)
        })?;
        debug!(key = %key, "File removed");
        Ok(())
    }

    /// Move a file by copying it to the new key and deleting the old one.
    /// Directories cannot be renamed.
    pub async fn rename(&self, src: &str, dst: &str) -> VfsResult<()> {
        let src_path = self.virtual_path(src);
        let dst_path = self.virtual_path(dst);
        let dst_key = self.storage_key(dst);
        if src_path == ROOT || dst_key.is_empty() || dst_key.ends_with('/') {
            return Err(VfsError::unsupported(format!("rename {} to {}", src_path, dst_path)));
        }
        if !self.is_file(src).await {
            if self.is_dir(src).await {
                return Err(VfsError::unsupported(format!("rename directory {}", src_path)));
            }
            return Err(VfsError::not_found(src_path));
        }

        let src_key = self.storage_key(src);
        if src_key == dst_key {
            return Ok(());
        }
        let data = self
            .storage
            .open(&src_key)
            .await
            .map_err(|e| VfsError::storage(src_path.clone(), e))?;
        self.storage
            .save(&dst_key, data)
            .await
            .map_err(|e| VfsError::storage(dst_path.clone(), e))?;
        self.storage.delete(&src_key).await.map_err(|e| {
            warn!(key = %src_key, error = %e, "Rename left source behind");
            VfsError::storage(src_path.clone(), e)
        })?;
        debug!(from = %src_key, to = %dst_key, "File renamed");
        Ok(())
    }

    pub fn chmod(&self, path: &str, _mode: u32) -> VfsResult<()> {
        Err(VfsError::unsupported(format!("chmod {}", self.virtual_path(path))))
    }

    pub fn mkstemp(&self) -> VfsResult<StorageFile> {
        Err(VfsError::unsupported("mkstemp"))
    }

    // ── Shared defaults used by patches ──

    pub async fn origin_exists(&self, path: &str) -> bool {
        let key = self.storage_key(path);
        if key.is_empty() {
            return true;
        }
        match self.storage.exists(&key).await {
            Ok(found) => found,
            Err(e) => {
                debug!(key = %key, error = %e, "Existence check failed, reporting absent");
                false
            }
        }
    }

    /// Root, or the directory marker exists.
    pub async fn origin_is_dir(&self, path: &str) -> bool {
        let vpath = self.virtual_path(path);
        if vpath == ROOT {
            return true;
        }
        self.exists(&dir_marker(&vpath)).await
    }

    pub async fn origin_getmtime(&self, path: &str) -> i64 {
        if self.is_dir(path).await {
            return 0;
        }
        self.file_mtime(path).await
    }

    pub async fn origin_stat(&self, path: &str) -> VfsResult<PseudoStat> {
        let vpath = self.virtual_path(path);
        if vpath == ROOT {
            return Ok(PseudoStat::directory());
        }
        if self.is_file(path).await {
            let key = self.storage_key(path);
            let size = self
                .storage
                .size(&key)
                .await
                .map_err(|e| VfsError::storage(vpath.clone(), e))?;
            return Ok(PseudoStat::file(size, self.file_mtime(path).await));
        }
        if self.is_dir(path).await {
            return Ok(PseudoStat::directory());
        }
        Err(VfsError::not_found(vpath))
    }

    pub async fn origin_listdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let vpath = self.virtual_path(path);
        let key = dir_marker(&self.keys.to_key(&vpath));
        debug!(path = %vpath, key = %key, "listdir");

        let listing = self
            .storage
            .listdir(&key)
            .await
            .map_err(|e| VfsError::storage(vpath.clone(), e))?;

        let mut entries: Vec<String> = listing
            .directories
            .iter()
            .filter(|d| !d.trim_end_matches('/').is_empty())
            .map(|d| entry_name(d, true))
            .collect();
        entries.extend(listing.files.into_iter().filter(|f| !f.is_empty()));
        Ok(entries)
    }

    /// Write a zero-length marker object.
    pub async fn origin_mkdir(&self, path: &str) -> VfsResult<()> {
        let vpath = self.virtual_path(path);
        let key = self.keys.to_key(&vpath);
        if key.is_empty() {
            return Err(VfsError::unsupported(format!("mkdir {}", vpath)));
        }
        let marker = dir_marker(&key);
        self.storage
            .save(&marker, Bytes::new())
            .await
            .map_err(|e| {
                warn!(key = %marker, error = %e, "mkdir failed");
                VfsError::CreateDirectory {
                    path: vpath.clone(),
                    source: e,
                }
            })?;
        debug!(key = %marker, "Directory marker created");
        Ok(())
    }

    /// Delete the marker object only; contents are left alone.
    pub async fn origin_rmdir(&self, path: &str) -> VfsResult<()> {
        let vpath = self.virtual_path(path);
        let key = self.keys.to_key(&vpath);
        if key.is_empty() {
            return Err(VfsError::unsupported(format!("rmdir {}", vpath)));
        }
        let marker = dir_marker(&key);
        self.storage.delete(&marker).await.map_err(|e| {
            warn!(key = %marker, error = %e, "rmdir failed");
            VfsError::RemoveDirectory {
                path: vpath.clone(),
                source: e,
            }
        })?;
        debug!(key = %marker, "Directory marker removed");
        Ok(())
    }

    // ── Helpers for patches ──

    /// Whether anything (marker or children) lives under the path's prefix.
    pub async fn has_prefix(&self, path: &str) -> bool {
        let key = self.keys.to_key(&self.virtual_path(path));
        if key.is_empty() {
            return true;
        }
        match self.storage.listdir(&dir_marker(&key)).await {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => {
                debug!(key = %key, error = %e, "Prefix listing failed, reporting absent");
                false
            }
        }
    }

    /// Modification time of a file key; any backend error reads as 0.
    pub async fn file_mtime(&self, path: &str) -> i64 {
        let key = self.storage_key(path);
        match self.storage.modified_time(&key).await {
            Ok(mtime) => mtime.epoch_seconds(),
            Err(e) => {
                debug!(key = %key, error = %e, "Modified time unavailable, reporting 0");
                0
            }
        }
    }
}
