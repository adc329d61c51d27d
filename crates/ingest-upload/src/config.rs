use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};
use crate::retry::ChunkRetryPolicy;

/// Default chunk size: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Tunables for a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes per chunk; the last chunk may be shorter.
    pub chunk_size: u64,
    /// Transfer attempts per chunk before it is marked failed.
    pub max_attempts: u32,
    /// Linear backoff step; the wait before attempt `k` is `(k - 1) * step`.
    pub backoff_step_ms: u64,
    /// Timeout applied to init and chunk requests, 0 disables it.
    pub request_timeout_secs: u64,
    /// Finalize assembles the archive server-side and can take minutes.
    pub finalize_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: 3,
            backoff_step_ms: 2000,
            request_timeout_secs: 0,
            finalize_timeout_secs: 300,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(UploadError::configuration("chunk_size must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::configuration("max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> ChunkRetryPolicy {
        ChunkRetryPolicy {
            max_attempts: self.max_attempts,
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }
}

/// Paths of the three ingestion operations, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestEndpoints {
    pub init: String,
    pub chunk: String,
    pub finalize: String,
}

impl Default for IngestEndpoints {
    fn default() -> Self {
        Self {
            init: "api/zips/init-chunked-upload".to_string(),
            chunk: "api/zips/upload-chunk".to_string(),
            finalize: "api/zips/finalize-upload".to_string(),
        }
    }
}
