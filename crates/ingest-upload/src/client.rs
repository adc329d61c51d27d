//! Session-aware wrapper around [`IngestApi`] that owns the chunk retry loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ChunkUpload, FinalizeUploadRequest, FinalizeResponse, IngestApi, InitUploadRequest};
use crate::error::{Result, UploadError};
use crate::retry::ChunkRetryPolicy;
use crate::session::{ChunkStatus, UploadSession};
use crate::source::ChunkSource;

#[derive(Clone)]
pub struct UploadProtocolClient {
    api: Arc<dyn IngestApi>,
    retry: ChunkRetryPolicy,
}

impl UploadProtocolClient {
    pub fn new(api: Arc<dyn IngestApi>, retry: ChunkRetryPolicy) -> Self {
        Self { api, retry }
    }

    pub fn retry_policy(&self) -> ChunkRetryPolicy {
        self.retry
    }

    pub async fn init(&self, session: &UploadSession) -> Result<()> {
        let metadata = session.metadata();
        let request = InitUploadRequest {
            filename: session.filename().to_string(),
            total_chunks: session.total_chunks(),
            file_size: session.total_size(),
            upload_id: session.upload_id().to_string(),
            clip_amount: metadata.clip_amount,
            season: metadata.season.clone(),
            year: metadata.year.to_string(),
        };
        self.api.init_session(&request).await.map_err(|e| match e {
            UploadError::InitFailed { .. } => e,
            other => UploadError::init_failed(other.to_string()),
        })?;
        info!(
            upload_id = %session.upload_id(),
            total_chunks = session.total_chunks(),
            "Upload session initialized"
        );
        Ok(())
    }

    /// Transfer chunk `index`, retrying every failure up to the attempt budget.
    ///
    /// Returns `true` when the server acknowledged the chunk. On exhaustion the
    /// chunk is left `Failed` and the last error is logged, not returned.
    ///
    /// `cancel` is honoured while waiting between attempts only; a request
    /// already sent runs to completion.
    pub async fn transfer_chunk(
        &self,
        session: &mut UploadSession,
        source: &dyn ChunkSource,
        index: u32,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(range) = session.chunks().get(index as usize).map(|c| c.range) else {
            return Err(UploadError::configuration(format!(
                "chunk {index} outside of session"
            )));
        };
        let upload_id = session.upload_id().to_string();
        let total_chunks = session.total_chunks();

        // Read once; retries share the buffer.
        let data = source.read_chunk(range).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let delay = self.retry.delay_before_attempt(attempt);
            if !delay.is_zero() {
                debug!(chunk_index = index, attempt, ?delay, "Waiting before retrying chunk");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Some(chunk) = session.chunk_mut(index) {
                            chunk.status = ChunkStatus::Failed;
                        }
                        return Err(UploadError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if let Some(chunk) = session.chunk_mut(index) {
                chunk.status = ChunkStatus::InFlight;
                chunk.attempts = attempt;
            }

            let upload = ChunkUpload {
                upload_id: upload_id.clone(),
                chunk_index: index,
                total_chunks,
                data: data.clone(),
            };
            match self.api.upload_chunk(upload).await {
                Ok(()) => {
                    if let Some(chunk) = session.chunk_mut(index) {
                        chunk.status = ChunkStatus::Succeeded;
                    }
                    debug!(chunk_index = index, attempt, "Chunk acknowledged");
                    return Ok(true);
                }
                Err(e) if self.retry.should_retry(attempt) => {
                    warn!(
                        chunk_index = index,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Chunk upload attempt failed, retrying"
                    );
                }
                Err(e) => {
                    if let Some(chunk) = session.chunk_mut(index) {
                        chunk.status = ChunkStatus::Failed;
                    }
                    warn!(
                        chunk_index = index,
                        attempts = attempt,
                        error = %e,
                        "Chunk upload failed after all attempts"
                    );
                    return Ok(false);
                }
            }
        }
    }

    pub async fn finalize(&self, session: &UploadSession) -> Result<FinalizeResponse> {
        let metadata = session.metadata();
        let request = FinalizeUploadRequest {
            upload_id: session.upload_id().to_string(),
            filename: session.filename().to_string(),
            clip_amount: metadata.clip_amount,
            season: metadata.season.clone(),
            year: metadata.year.to_string(),
        };
        let response = self.api.finalize_session(&request).await.map_err(|e| match e {
            UploadError::FinalizeFailed { .. } | UploadError::MissingJobId => e,
            other => UploadError::finalize_failed(other.to_string()),
        })?;
        info!(
            upload_id = %session.upload_id(),
            job_id = %response.job_id,
            "Upload finalized"
        );
        Ok(response)
    }
}
