//! Local directory storage client.
//!
//! Keys map to paths under a base directory. This is the only hierarchical
//! client: directories are real, so `/`-terminated keys address them
//! directly. Uses atomic write (temp file → fsync → rename) to prevent
//! partial writes.

use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use storagefs_common::backend::{
    BackendKind, Listing, ModifiedTime, StorageClient, StorageError, StorageResult,
};

pub struct DirectoryStorage {
    base_path: PathBuf,
}

impl DirectoryStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self { base_path: base_path.into() }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> PathBuf {
        // Prevent path traversal
        let mut path = self.base_path.clone();
        for component in Path::new(key.trim_start_matches('/')).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        path
    }
}

fn map_io(key: &str, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(key)
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl StorageClient for DirectoryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let dest = self.full_path(key);

        if key.ends_with('/') {
            tokio::fs::create_dir_all(&dest)
                .await
                .context("Failed to create directory")?;
            debug!(key = %key, "Directory created");
            return Ok(());
        }

        // Ensure parent directory exists
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create parent directory")?;
        }

        // Write to temp file, then rename (atomic)
        let tmp_path = dest.with_extension("storagefs-tmp");
        tokio::fs::write(&tmp_path, &data)
            .await
            .context("Failed to write temp file")?;

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&tmp_path)
            .await
            .context("Failed to open temp file for fsync")?;
        file.sync_all().await.context("fsync failed")?;
        drop(file);

        tokio::fs::rename(&tmp_path, &dest)
            .await
            .context("Atomic rename failed")?;

        debug!(key = %key, bytes = data.len(), "Directory save complete");
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<Bytes> {
        let src = self.full_path(key);
        let data = tokio::fs::read(&src).await.map_err(|e| map_io(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.full_path(key);
        if key.ends_with('/') {
            tokio::fs::remove_dir(&path).await.map_err(|e| map_io(key, e))?;
        } else {
            tokio::fs::remove_file(&path).await.map_err(|e| map_io(key, e))?;
        }
        debug!(key = %key, "Directory delete complete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.full_path(key);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::Io(e)),
        };
        if key.is_empty() || key.ends_with('/') {
            Ok(meta.is_dir())
        } else {
            Ok(meta.is_file())
        }
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let meta = tokio::fs::metadata(self.full_path(key))
            .await
            .map_err(|e| map_io(key, e))?;
        Ok(meta.len())
    }

    async fn modified_time(&self, key: &str) -> StorageResult<ModifiedTime> {
        let meta = tokio::fs::metadata(self.full_path(key))
            .await
            .map_err(|e| map_io(key, e))?;
        let modified = meta.modified()?;
        Ok(ModifiedTime::from(DateTime::<Utc>::from(modified)))
    }

    async fn listdir(&self, key: &str) -> StorageResult<Listing> {
        let dir = self.full_path(key);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| map_io(key, e))?;

        let mut listing = Listing::default();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                listing.directories.push(name);
            } else if file_type.is_file() {
                listing.files.push(name);
            }
        }
        listing.directories.sort();
        listing.files.sort();
        Ok(listing)
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        Some(self.full_path(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path());

        let data = Bytes::from("hello world");
        storage.save("test/subdir/file.txt", data.clone()).await.unwrap();

        assert_eq!(storage.open("test/subdir/file.txt").await.unwrap(), data);
        assert_eq!(storage.size("test/subdir/file.txt").await.unwrap(), 11);
        assert!(storage.exists("test/subdir/file.txt").await.unwrap());
        assert!(storage.exists("test/subdir/").await.unwrap());
        assert!(!storage.exists("test/subdir").await.unwrap());

        storage.delete("test/subdir/file.txt").await.unwrap();
        let err = storage.open("test/subdir/file.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_directory_storage_listdir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path());

        storage.save("b/", Bytes::new()).await.unwrap();
        storage.save("a/", Bytes::new()).await.unwrap();
        storage.save("c.txt", Bytes::from("c")).await.unwrap();

        let listing = storage.listdir("").await.unwrap();
        assert_eq!(listing.directories, vec!["a", "b"]);
        assert_eq!(listing.files, vec!["c.txt"]);

        let err = storage.listdir("missing/").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_directory_storage_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path());
        assert!(storage.delete("nope.txt").await.unwrap_err().is_not_found());
        assert!(storage.delete("nope/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_directory_storage_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path());
        storage.save("stamp.txt", Bytes::from("x")).await.unwrap();

        let mtime = storage.modified_time("stamp.txt").await.unwrap();
        assert!(matches!(mtime, ModifiedTime::Aware(_)));
        let age = Utc::now().timestamp() - mtime.epoch_seconds();
        assert!((0..60).contains(&age));
    }

    #[test]
    fn test_directory_storage_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirectoryStorage::new(dir.path());

        let dest = storage.full_path("../../../etc/passwd");
        assert!(dest.starts_with(dir.path()));
        assert_eq!(dest, dir.path().join("etc/passwd"));
        assert_eq!(storage.local_path("/a/b"), Some(dir.path().join("a/b")));
    }
}
