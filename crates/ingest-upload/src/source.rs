//! Byte sources the coordinator drains one chunk at a time.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;
use crate::splitter::ChunkRange;

/// A sized, randomly addressable source of upload bytes.
///
/// Only the range being transferred is held in memory, so a multi-gigabyte
/// archive costs at most one chunk of buffer.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// File name reported to the ingestion endpoint.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly the bytes covered by `range`.
    async fn read_chunk(&self, range: ChunkRange) -> Result<Bytes>;
}

/// A file on the operator's machine.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )
            .into());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self {
            path,
            name,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn read_chunk(&self, range: ChunkRange) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buffer = vec![0u8; range.len() as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

/// An in-memory buffer, mostly useful for small payloads and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&self, range: ChunkRange) -> Result<Bytes> {
        let start = range.start as usize;
        let end = range.end as usize;
        if end > self.data.len() || start > end {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside of {} bytes", self.data.len()),
            )
            .into());
        }
        Ok(self.data.slice(start..end))
    }
}
