//! In-process flat object store.
//!
//! Behaves like a bucket: keys are opaque strings, a "directory" is only a
//! `/`-terminated marker object or a shared key prefix, and listing groups
//! keys by the next `/` after the requested prefix.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use storagefs_common::backend::{
    BackendKind, Listing, ModifiedTime, StorageClient, StorageError, StorageResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit modification time.
    pub fn insert_with_mtime(&self, key: &str, data: impl Into<Bytes>, modified: DateTime<Utc>) {
        self.objects.write().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    fn get(&self, key: &str) -> StorageResult<StoredObject> {
        self.objects
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let len = data.len();
        self.insert_with_mtime(key, data, Utc::now());
        debug!(key = %key, bytes = len, "Memory save complete");
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<Bytes> {
        Ok(self.get(key)?.data)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().unwrap().remove(key);
        debug!(key = %key, "Memory delete complete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().unwrap().contains_key(key))
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        Ok(self.get(key)?.data.len() as u64)
    }

    async fn modified_time(&self, key: &str) -> StorageResult<ModifiedTime> {
        Ok(ModifiedTime::from(self.get(key)?.modified))
    }

    async fn listdir(&self, key: &str) -> StorageResult<Listing> {
        let objects = self.objects.read().unwrap();
        let mut listing = Listing::default();
        let mut matched = false;

        for object_key in objects.keys() {
            let Some(rest) = object_key.strip_prefix(key) else {
                continue;
            };
            matched = true;
            match rest.split_once('/') {
                Some((dir, _)) => {
                    if listing.directories.last().map(String::as_str) != Some(dir) {
                        listing.directories.push(dir.to_string());
                    }
                }
                None => listing.files.push(rest.to_string()),
            }
        }

        if !matched && !key.is_empty() {
            return Err(StorageError::not_found(key));
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_listdir_groups_by_prefix() {
        let storage = MemoryStorage::new();
        storage.save("docs/", Bytes::new()).await.unwrap();
        storage.save("docs/a/one.txt", Bytes::from("1")).await.unwrap();
        storage.save("docs/a/two.txt", Bytes::from("2")).await.unwrap();
        storage.save("docs/b/", Bytes::new()).await.unwrap();
        storage.save("docs/c.txt", Bytes::from("c")).await.unwrap();
        storage.save("other.txt", Bytes::from("o")).await.unwrap();

        let listing = storage.listdir("docs/").await.unwrap();
        assert_eq!(listing.directories, vec!["a", "b"]);
        // The marker object itself shows up as an empty file name.
        assert_eq!(listing.files, vec!["", "c.txt"]);

        let root = storage.listdir("").await.unwrap();
        assert_eq!(root.directories, vec!["docs"]);
        assert_eq!(root.files, vec!["other.txt"]);
    }

    #[tokio::test]
    async fn test_memory_listdir_missing_prefix() {
        let storage = MemoryStorage::new();
        assert!(storage.listdir("").await.unwrap().is_empty());
        assert!(storage.listdir("ghost/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_memory_object_metadata() {
        let storage = MemoryStorage::new();
        let when = Utc.with_ymd_and_hms(2023, 11, 5, 9, 15, 0).unwrap();
        storage.insert_with_mtime("report.csv", "a,b,c\n", when);

        assert!(storage.exists("report.csv").await.unwrap());
        assert!(!storage.exists("report").await.unwrap());
        assert_eq!(storage.size("report.csv").await.unwrap(), 6);
        assert_eq!(
            storage.modified_time("report.csv").await.unwrap().epoch_seconds(),
            when.timestamp()
        );
        assert!(storage.size("missing").await.unwrap_err().is_not_found());

        storage.delete("report.csv").await.unwrap();
        assert!(storage.keys().is_empty());
    }
}
