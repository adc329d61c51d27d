use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

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

    #[error("failed to decode payload: {reason}")]
    Decode { reason: String },

    #[error("websocket error: {source}")]
    WebSocket {
        #[from]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("realtime connection closed")]
    ConnectionClosed,

    #[error("job {job_id} already finished")]
    JobTerminal { job_id: String },

    #[error("job {job_id} is not being tracked")]
    UnknownJob { job_id: String },

    #[error("force complete failed for job {job_id}: {reason}")]
    ForceCompleteFailed { job_id: String, reason: String },
}

impl MonitorError {
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

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn force_complete_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ForceCompleteFailed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::WebSocket { .. }
            | Self::ConnectionClosed
            | Self::ForceCompleteFailed { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Configuration { .. }
            | Self::InvalidUrl { .. }
            | Self::Decode { .. }
            | Self::JobTerminal { .. }
            | Self::UnknownJob { .. } => false,
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
