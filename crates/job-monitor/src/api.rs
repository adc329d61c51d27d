//! HTTP side of job tracking: status polls and forced completion.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::{DEFAULT_REQUEST_TIMEOUT_MS, JobEndpoints};
use crate::error::{MonitorError, Result};
use crate::event::{JobEvent, UNKNOWN_JOB_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    #[serde(alias = "processing")]
    Running,
    Completed,
    Error,
}

/// Response of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub progress: f64,
    pub status: PollStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PollStatus::Completed | PollStatus::Error)
    }

    /// Events equivalent to this status snapshot.
    pub fn into_events(self) -> Vec<JobEvent> {
        match self.status {
            PollStatus::Running => {
                let mut events = vec![JobEvent::Progress {
                    percent: self.progress.clamp(0.0, 100.0),
                    processed: None,
                    total: None,
                    eta: None,
                }];
                if let Some(message) = self.message.filter(|m| !m.is_empty()) {
                    events.push(JobEvent::Phase {
                        label: "processing".to_string(),
                        message,
                    });
                }
                events
            }
            PollStatus::Completed => vec![JobEvent::Completed],
            PollStatus::Error => vec![JobEvent::Error {
                message: self
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| UNKNOWN_JOB_ERROR.to_string()),
            }],
        }
    }
}

/// Remote job operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus>;

    /// Ask the server to mark the job completed. Idempotent.
    async fn force_complete(&self, job_id: &str) -> Result<()>;
}

/// [`JobApi`] over HTTP with bearer-token auth.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    endpoints: JobEndpoints,
    timeout: Duration,
}

impl HttpJobApi {
    pub fn new(client: reqwest::Client, mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            token: None,
            endpoints: JobEndpoints::default(),
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Per-request timeout for status polls and force-complete calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_endpoints(mut self, endpoints: JobEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| MonitorError::InvalidUrl {
                reason: format!("{path}: {e}"),
            })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MonitorError::http_status(status, operation, body))
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.url(&self.endpoints.process_status_path(job_id))?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let response = ensure_success(response, "status").await?;
        let body = response.text().await?;
        let status: JobStatus = serde_json::from_str(&body)?;
        debug!(job_id, progress = status.progress, status = ?status.status, "Polled job status");
        Ok(status)
    }

    async fn force_complete(&self, job_id: &str) -> Result<()> {
        let url = self.url(&self.endpoints.force_complete_path(job_id))?;
        let response = self.authorize(self.client.post(url)).send().await?;
        ensure_success(response, "force-complete").await.map_err(|e| {
            MonitorError::force_complete_failed(job_id, e.to_string())
        })?;
        Ok(())
    }
}
