//! Trait implemented by all storage clients the filesystem adapter can sit on.
//!
//! Each client handles the raw I/O for one kind of store (local directory,
//! in-memory map, S3, GCS). Keys are flat strings without a leading `/`; the
//! empty key is the storage root. The adapter is responsible for path
//! handling and directory emulation; the client only answers key-level
//! questions.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};

/// Identity of a concrete storage client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Directory,
    Memory,
    S3,
    Gcs,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Directory => "directory",
            BackendKind::Memory => "memory",
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
        }
    }

    /// Flat stores have no native directories; they are emulated with
    /// `/`-terminated marker objects and key prefixes.
    pub fn is_flat(&self) -> bool {
        !matches!(self, BackendKind::Directory)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage API error: HTTP {status} - {message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One level of a listing, relative to the listed key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.files.is_empty()
    }
}

/// Modification time as reported by a backend.
///
/// Most stores report a zoned timestamp; some only hand back a wall-clock
/// value with no offset, which is read as local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifiedTime {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl ModifiedTime {
    /// Epoch seconds. A naive time that does not exist in the local zone
    /// (DST gap) yields 0.
    pub fn epoch_seconds(&self) -> i64 {
        match self {
            ModifiedTime::Aware(dt) => dt.timestamp(),
            ModifiedTime::Naive(naive) => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .unwrap_or(0),
        }
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for ModifiedTime {
    fn from(dt: DateTime<Tz>) -> Self {
        ModifiedTime::Aware(dt.fixed_offset())
    }
}

#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Which concrete client this is.
    fn kind(&self) -> BackendKind;

    /// Write `data` at `key`, replacing any existing object.
    async fn save(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Read the whole object at `key`.
    async fn open(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete the object at `key`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Whether an object exists at exactly `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size in bytes of the object at `key`.
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// Last modification time of the object at `key`.
    async fn modified_time(&self, key: &str) -> StorageResult<ModifiedTime>;

    /// List one level under `key`. A missing non-root prefix is `NotFound`.
    async fn listdir(&self, key: &str) -> StorageResult<Listing>;

    /// Physical path for `key` on disk-backed clients.
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// Join a location prefix and a key the way object stores expect:
/// `{location}/{key}`, or just `key` when there is no location.
pub fn prefixed_key(location: &str, key: &str) -> String {
    let location = location.trim_matches('/');
    if location.is_empty() {
        key.to_string()
    } else if key.is_empty() {
        format!("{}/", location)
    } else {
        format!("{}/{}", location, key)
    }
}
