//! Drives one upload end to end: init, sequential chunk transfer, finalize.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::IngestApi;
use crate::client::UploadProtocolClient;
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::progress::{UploadProgress, UploadProgressReporter};
use crate::session::{UploadMetadata, UploadSession};
use crate::source::ChunkSource;

/// Runs chunked uploads against an [`IngestApi`].
///
/// Chunks go out strictly one at a time, in index order. Finalize is only
/// requested once every chunk has been acknowledged; if it fails the session
/// is kept so [`UploadCoordinator::finalize`] can be retried without sending
/// any chunk again.
pub struct UploadCoordinator {
    client: UploadProtocolClient,
    config: UploadConfig,
    progress: UploadProgressReporter,
    cancel: CancellationToken,
    session: Option<UploadSession>,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn IngestApi>, config: UploadConfig) -> Self {
        let client = UploadProtocolClient::new(api, config.retry_policy());
        Self {
            client,
            config,
            progress: UploadProgressReporter::noop(),
            cancel: CancellationToken::new(),
            session: None,
        }
    }

    pub fn with_progress(mut self, progress: UploadProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Token that stops the upload between chunks or during a retry backoff.
    ///
    /// A request already in flight is allowed to finish and its result is
    /// dropped. Once a run has observed the cancellation the coordinator swaps
    /// in a fresh token, so fetch the token again before the next `start`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The most recent session, if any.
    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    /// Upload `source` and return the job identifier reported by finalize.
    pub async fn start(
        &mut self,
        source: &dyn ChunkSource,
        metadata: UploadMetadata,
    ) -> Result<String> {
        let result = self.run(source, metadata).await;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        result
    }

    async fn run(&mut self, source: &dyn ChunkSource, metadata: UploadMetadata) -> Result<String> {
        self.config.validate()?;
        if source.is_empty() {
            return Err(UploadError::EmptySource {
                name: source.name().to_string(),
            });
        }
        if source.len().div_ceil(self.config.chunk_size) > u64::from(u32::MAX) {
            return Err(UploadError::configuration(format!(
                "chunk_size {} is too small for {} bytes",
                self.config.chunk_size,
                source.len()
            )));
        }

        let session = self.session.insert(UploadSession::new(
            source.name(),
            source.len(),
            self.config.chunk_size,
            metadata,
        ));
        let total_chunks = session.total_chunks();
        info!(
            upload_id = %session.upload_id(),
            filename = %session.filename(),
            size = session.total_size(),
            total_chunks,
            "Starting chunked upload"
        );
        self.progress
            .report(UploadProgress::before_chunk(0, total_chunks));

        if let Err(e) = self.client.init(session).await {
            session.mark_terminal();
            return Err(e);
        }

        for index in 0..total_chunks {
            if self.cancel.is_cancelled() {
                session.mark_terminal();
                return Err(UploadError::Cancelled);
            }
            self.progress
                .report(UploadProgress::before_chunk(index, total_chunks));

            if let Err(e) = self
                .client
                .transfer_chunk(session, source, index, &self.cancel)
                .await
            {
                session.mark_terminal();
                return Err(e);
            }
        }
        if self.cancel.is_cancelled() {
            session.mark_terminal();
            return Err(UploadError::Cancelled);
        }

        let failed = session.failed_indices();
        if !failed.is_empty() {
            warn!(
                upload_id = %session.upload_id(),
                failed = ?failed,
                bytes_sent = session.bytes_succeeded(),
                "Upload incomplete, skipping finalize"
            );
            session.mark_terminal();
            return Err(UploadError::ChunksFailed {
                count: failed.len(),
                indices: failed,
            });
        }

        self.progress
            .report(UploadProgress::awaiting_finalize(total_chunks));
        self.finalize().await
    }

    /// Request finalize for the current session.
    ///
    /// Valid only when every chunk succeeded and no finalize has succeeded yet.
    pub async fn finalize(&mut self) -> Result<String> {
        let session = match self.session.as_mut() {
            Some(session) if !session.is_terminal() && session.all_succeeded() => session,
            _ => return Err(UploadError::NoSession),
        };
        let response = self.client.finalize(session).await?;
        session.mark_terminal();
        self.progress
            .report(UploadProgress::finished(session.total_chunks()));
        Ok(response.job_id)
    }
}
