//! Client-side record of one chunked upload.

use serde::{Deserialize, Serialize};

use crate::splitter::{self, ChunkRange};

/// Status of a single chunk within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub range: ChunkRange,
    pub status: ChunkStatus,
    pub attempts: u32,
}

impl Chunk {
    fn pending(range: ChunkRange) -> Self {
        Self {
            range,
            status: ChunkStatus::Pending,
            attempts: 0,
        }
    }

    pub fn index(&self) -> u32 {
        self.range.index
    }
}

/// Archive metadata forwarded to the ingestion endpoint on init and finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub clip_amount: u32,
    pub season: String,
    pub year: i32,
}

/// One in-progress chunked upload, identified by a client-generated `upload_id`.
#[derive(Debug, Clone)]
pub struct UploadSession {
    upload_id: String,
    filename: String,
    total_size: u64,
    chunk_size: u64,
    metadata: UploadMetadata,
    chunks: Vec<Chunk>,
    terminal: bool,
}

impl UploadSession {
    /// Create a session with a fresh upload id and every chunk pending.
    ///
    /// `chunk_size` must be non-zero; callers validate configuration first.
    pub fn new(
        filename: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        metadata: UploadMetadata,
    ) -> Self {
        Self::with_upload_id(
            uuid::Uuid::new_v4().to_string(),
            filename,
            total_size,
            chunk_size,
            metadata,
        )
    }

    pub fn with_upload_id(
        upload_id: impl Into<String>,
        filename: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        metadata: UploadMetadata,
    ) -> Self {
        let chunks = splitter::split(total_size, chunk_size)
            .into_iter()
            .map(Chunk::pending)
            .collect();
        Self {
            upload_id: upload_id.into(),
            filename: filename.into(),
            total_size,
            chunk_size,
            metadata,
            chunks,
            terminal: false,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn metadata(&self) -> &UploadMetadata {
        &self.metadata
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunk_mut(&mut self, index: u32) -> Option<&mut Chunk> {
        self.chunks.get_mut(index as usize)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub(crate) fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    /// True only when every chunk has been acknowledged by the server.
    pub fn all_succeeded(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| chunk.status == ChunkStatus::Succeeded)
    }

    pub fn failed_indices(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.status == ChunkStatus::Failed)
            .map(Chunk::index)
            .collect()
    }

    pub fn bytes_succeeded(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|chunk| chunk.status == ChunkStatus::Succeeded)
            .map(|chunk| chunk.range.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            clip_amount: 12,
            season: "Winter".to_string(),
            year: 2025,
        }
    }

    #[test]
    fn new_session_has_pending_chunks_and_unique_id() {
        let a = UploadSession::new("clips.zip", 1000, 300, metadata());
        let b = UploadSession::new("clips.zip", 1000, 300, metadata());

        assert_ne!(a.upload_id(), b.upload_id());
        assert_eq!(a.total_chunks(), 4);
        assert!(a.chunks().iter().all(|c| c.status == ChunkStatus::Pending));
        assert!(a.chunks().iter().all(|c| c.attempts == 0));
        assert!(!a.all_succeeded());
        assert!(!a.is_terminal());
    }

    #[test]
    fn failed_indices_lists_only_failed_chunks() {
        let mut session = UploadSession::with_upload_id("u-1", "a.zip", 40, 10, metadata());
        for index in 0..4 {
            let chunk = session.chunk_mut(index).unwrap();
            chunk.status = if index % 2 == 0 {
                ChunkStatus::Succeeded
            } else {
                ChunkStatus::Failed
            };
        }
        assert_eq!(session.failed_indices(), vec![1, 3]);
        assert_eq!(session.bytes_succeeded(), 20);
    }
}
