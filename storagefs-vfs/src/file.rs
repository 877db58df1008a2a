//! File handles returned by [`StorageFs::open`](crate::StorageFs::open).
//!
//! Object stores have no partial writes, so a handle holds the whole object
//! in memory. Read handles fetch on open; write and append handles buffer
//! and upload once on [`StorageFile::close`].

use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use storagefs_common::backend::StorageClient;

use crate::error::{VfsError, VfsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Truncate.
    Write,
    /// Start from the current content, if any.
    Append,
}

impl OpenMode {
    pub fn parse(mode: &str) -> VfsResult<Self> {
        match mode {
            "r" | "rb" => Ok(OpenMode::Read),
            "w" | "wb" => Ok(OpenMode::Write),
            "a" | "ab" => Ok(OpenMode::Append),
            other => Err(VfsError::unsupported(format!("open mode '{}'", other))),
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

pub struct StorageFile {
    name: String,
    key: String,
    mode: OpenMode,
    storage: Arc<dyn StorageClient>,
    reader: Cursor<Bytes>,
    buffer: Vec<u8>,
    closed: bool,
}

impl StorageFile {
    pub(crate) async fn open(
        storage: Arc<dyn StorageClient>,
        key: String,
        name: String,
        mode: OpenMode,
    ) -> VfsResult<Self> {
        let mut reader = Cursor::new(Bytes::new());
        let mut buffer = Vec::new();
        match mode {
            OpenMode::Read => {
                let data = storage
                    .open(&key)
                    .await
                    .map_err(|e| VfsError::storage(name.clone(), e))?;
                reader = Cursor::new(data);
            }
            OpenMode::Append => match storage.open(&key).await {
                Ok(data) => buffer = data.to_vec(),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(VfsError::storage(name, e)),
            },
            OpenMode::Write => {}
        }
        Ok(Self {
            name,
            key,
            mode,
            storage,
            reader,
            buffer,
            closed: false,
        })
    }

    /// Virtual path the handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Upload buffered content for write handles. Idempotent.
    pub async fn close(&mut self) -> VfsResult<()> {
        if self.closed {
            return Ok(());
        }
        if self.mode.is_write() {
            let data = Bytes::from(std::mem::take(&mut self.buffer));
            let len = data.len();
            self.storage
                .save(&self.key, data)
                .await
                .map_err(|e| VfsError::storage(self.name.clone(), e))?;
            debug!(key = %self.key, bytes = len, "File uploaded");
        }
        self.closed = true;
        Ok(())
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "I/O operation on closed file"));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFile")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Read for StorageFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        if self.mode.is_write() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file not open for reading"));
        }
        self.reader.read(buf)
    }
}

impl Write for StorageFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        if !self.mode.is_write() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file not open for writing"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for StorageFile {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = Read::read(this, buf.initialize_unfilled())?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for StorageFile {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Write::write(self.get_mut(), buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Uploading needs [`StorageFile::close`]; shutdown only flushes.
    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for StorageFile {
    fn drop(&mut self) {
        if self.mode.is_write() && !self.closed {
            warn!(key = %self.key, "Write handle dropped without close, data discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storagefs_backends::MemoryStorage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_modes() {
        assert_eq!(OpenMode::parse("rb").unwrap(), OpenMode::Read);
        assert_eq!(OpenMode::parse("w").unwrap(), OpenMode::Write);
        assert_eq!(OpenMode::parse("ab").unwrap(), OpenMode::Append);
        assert!(OpenMode::parse("r+").unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn test_write_uploads_on_close() {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = StorageFile::open(
            storage.clone(),
            "out.txt".to_string(),
            "/out.txt".to_string(),
            OpenMode::Write,
        )
        .await
        .unwrap();
        AsyncWriteExt::write_all(&mut file, b"hello ").await.unwrap();
        AsyncWriteExt::write_all(&mut file, b"world").await.unwrap();
        assert!(!storage.exists("out.txt").await.unwrap());

        file.close().await.unwrap();
        assert!(file.closed());
        assert_eq!(storage.open("out.txt").await.unwrap(), Bytes::from_static(b"hello world"));
        assert!(Write::write(&mut file, b"late").is_err());
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let storage = Arc::new(MemoryStorage::new());
        storage.save("log.txt", Bytes::from_static(b"one\n")).await.unwrap();

        let mut file = StorageFile::open(
            storage.clone(),
            "log.txt".to_string(),
            "/log.txt".to_string(),
            OpenMode::Append,
        )
        .await
        .unwrap();
        AsyncWriteExt::write_all(&mut file, b"two\n").await.unwrap();
        file.close().await.unwrap();

        let mut file = StorageFile::open(
            storage.clone(),
            "log.txt".to_string(),
            "/log.txt".to_string(),
            OpenMode::Read,
        )
        .await
        .unwrap();
        let mut content = String::new();
        AsyncReadExt::read_to_string(&mut file, &mut content).await.unwrap();
        assert_eq!(content, "one\ntwo\n");
        assert!(Write::write(&mut file, b"x").is_err());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let storage = Arc::new(MemoryStorage::new());
        let result = StorageFile::open(
            storage,
            "ghost.txt".to_string(),
            "/ghost.txt".to_string(),
            OpenMode::Read,
        )
        .await;
        assert!(result.unwrap_err().is_not_found());
    }
}
