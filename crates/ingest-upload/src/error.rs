use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload cancelled")]
    Cancelled,

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("source `{name}` is empty, nothing to upload")]
    EmptySource { name: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation}: {body}")]
    HttpStatus {
        status: StatusCode,
        operation: &'static str,
        body: String,
    },

    #[error("invalid endpoint URL: {reason}")]
    InvalidUrl { reason: String },

    #[error("failed to initialize upload session: {reason}")]
    InitFailed { reason: String },

    #[error("Failed to upload {count} chunks. Please retry.")]
    ChunksFailed { count: usize, indices: Vec<u32> },

    #[error("failed to finalize upload: {reason}")]
    FinalizeFailed { reason: String },

    #[error("finalize response did not contain a job identifier")]
    MissingJobId,

    #[error("no upload session awaiting finalize")]
    NoSession,
}

impl UploadError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, operation: &'static str, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            operation,
            body: body.into(),
        }
    }

    pub fn init_failed(reason: impl Into<String>) -> Self {
        Self::InitFailed {
            reason: reason.into(),
        }
    }

    pub fn finalize_failed(reason: impl Into<String>) -> Self {
        Self::FinalizeFailed {
            reason: reason.into(),
        }
    }

    /// Whether a single request that produced this error is worth repeating.
    ///
    /// Chunk transfers retry every failure up to the attempt budget and only
    /// record this in their logs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::Configuration { .. }
            | Self::EmptySource { .. }
            | Self::InvalidUrl { .. }
            | Self::ChunksFailed { .. }
            | Self::MissingJobId
            | Self::NoSession => false,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { .. }
            | Self::Io { .. }
            | Self::InitFailed { .. }
            | Self::FinalizeFailed { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
