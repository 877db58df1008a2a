//! Adapter error types.
//!
//! Three kinds of failure reach the protocol layer: the target is missing,
//! the operation has no backend equivalent, or the backend failed while
//! carrying out a mutation. Read-only metadata queries never surface the
//! last kind; they degrade instead.

use std::io;

use storagefs_common::backend::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    /// Target key absent.
    #[error("No such file or directory: {0}")]
    NotFound(String),

    /// No backend equivalent (permission bits, temp files, links).
    #[error("Operation not permitted: {0}")]
    Unsupported(String),

    #[error("Cannot create directory: {path}")]
    CreateDirectory {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("Cannot remove directory: {path}")]
    RemoveDirectory {
        path: String,
        #[source]
        source: StorageError,
    },

    /// Backend failure during a data-bearing operation.
    #[error("Storage error on {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Wrap a storage error for `path`, keeping "not found" distinguishable.
    pub fn storage(path: impl Into<String>, source: StorageError) -> Self {
        let path = path.into();
        match source {
            StorageError::NotFound(_) => Self::NotFound(path),
            source => Self::Storage { path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, VfsError::Unsupported(_))
    }

    /// POSIX errno for protocol layers that report numeric errors.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => libc::ENOENT,
            VfsError::Unsupported(_) => libc::EPERM,
            VfsError::CreateDirectory { .. } | VfsError::RemoveDirectory { .. } => libc::EACCES,
            VfsError::Storage { .. } => libc::EIO,
            VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Io(inner) => inner,
            other => {
                let kind = match &other {
                    VfsError::NotFound(_) => io::ErrorKind::NotFound,
                    VfsError::Storage { .. } => io::ErrorKind::Other,
                    _ => io::ErrorKind::PermissionDenied,
                };
                io::Error::new(kind, other.to_string())
            }
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
