//! Storage adapter for the underlying host filesystem.
//!
//! This layer is the only point that touches non-metadata I/O: opening a
//! real file for sequential reading and statting it for attributes. The
//! virtual directory engine goes through the [`FileStorage`] trait so it can
//! be exercised against a mock without a real filesystem.

pub mod attr;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::SystemTime;
use tokio::io::AsyncReadExt;

use crate::common::Result;

/// Attributes of a file on the underlying filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub perm: u16,
    pub is_dir: bool,
    pub mtime: SystemTime,
    pub crtime: SystemTime,
}

/// Sequential reader over one open file. The underlying OS handle is
/// released when the reader is dropped.
#[async_trait]
pub trait FileReader: Send {
    /// Read up to `buf.len()` bytes, returning the number of bytes read;
    /// zero means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Trait for storage operations.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Open a file by absolute path for sequential reading.
    async fn open(&self, abs_path: &str) -> Result<Box<dyn FileReader>>;

    /// Stat a file by absolute path.
    async fn stat(&self, abs_path: &str) -> Result<FileAttr>;
}

/// Fill a buffer of exactly `size` bytes from the reader, tolerating end of
/// stream as a short read. The kernel expects page-cache pages to be either
/// fully populated or declared short, never partially filled mid-buffer.
pub async fn read_full(reader: &mut dyn FileReader, size: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}

/// Storage adapter backed by the local OS.
pub struct LocalStorage;

struct LocalFile {
    inner: tokio::fs::File,
}

#[async_trait]
impl FileReader for LocalFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn open(&self, abs_path: &str) -> Result<Box<dyn FileReader>> {
        let file = tokio::fs::File::open(abs_path).await?;
        Ok(Box::new(LocalFile { inner: file }))
    }

    async fn stat(&self, abs_path: &str) -> Result<FileAttr> {
        let meta = tokio::fs::metadata(abs_path).await?;
        Ok(FileAttr {
            size: meta.len(),
            perm: attr::mode_bits(&meta),
            is_dir: meta.is_dir(),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            crtime: attr::create_time(&meta),
        })
    }
}
