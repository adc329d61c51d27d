//! Wire protocol of the ingestion endpoint: init, chunk transfer, finalize.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::config::{IngestEndpoints, UploadConfig};
use crate::error::{Result, UploadError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_chunks: u32,
    pub file_size: u64,
    pub upload_id: String,
    pub clip_amount: u32,
    pub season: String,
    pub year: String,
}

/// One chunk transfer; `data` is reference counted so retries do not copy it.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub filename: String,
    pub clip_amount: u32,
    pub season: String,
    pub year: String,
}

/// Finalize acknowledgement. Only the job identifier is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeResponse {
    pub job_id: String,
    pub raw: Value,
}

impl FinalizeResponse {
    /// Extract the job identifier from a finalize body.
    ///
    /// `jobId` wins over `job_id` and `id`; both strings and numbers are
    /// accepted, and a `data` wrapper object is looked through.
    pub fn from_json(raw: Value) -> Result<Self> {
        let job_id = find_job_id(&raw)
            .or_else(|| raw.get("data").and_then(find_job_id))
            .ok_or(UploadError::MissingJobId)?;
        Ok(Self { job_id, raw })
    }
}

fn find_job_id(value: &Value) -> Option<String> {
    ["jobId", "job_id", "id"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|id| match id {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// The three remote operations of the chunked-upload protocol.
#[async_trait]
pub trait IngestApi: Send + Sync {
    async fn init_session(&self, request: &InitUploadRequest) -> Result<()>;

    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<()>;

    async fn finalize_session(&self, request: &FinalizeUploadRequest) -> Result<FinalizeResponse>;
}

/// [`IngestApi`] over HTTP with bearer-token auth.
#[derive(Debug, Clone)]
pub struct HttpIngestApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    endpoints: IngestEndpoints,
    request_timeout: Option<Duration>,
    finalize_timeout: Duration,
}

impl HttpIngestApi {
    pub fn new(client: reqwest::Client, base_url: Url, config: &UploadConfig) -> Self {
        Self {
            client,
            base_url: normalize_base(base_url),
            token: None,
            endpoints: IngestEndpoints::default(),
            request_timeout: config.request_timeout(),
            finalize_timeout: config.finalize_timeout(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_endpoints(mut self, endpoints: IngestEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| UploadError::InvalidUrl {
                reason: format!("{path}: {e}"),
            })
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
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
    Err(UploadError::http_status(status, operation, body))
}

#[async_trait]
impl IngestApi for HttpIngestApi {
    async fn init_session(&self, request: &InitUploadRequest) -> Result<()> {
        let url = self.endpoint(&self.endpoints.init)?;
        debug!(upload_id = %request.upload_id, %url, "Initializing chunked upload");
        let response = self.post(url).json(request).send().await?;
        ensure_success(response, "init").await?;
        Ok(())
    }

    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<()> {
        let url = self.endpoint(&self.endpoints.chunk)?;
        let length = chunk.data.len() as u64;
        let part = Part::stream_with_length(reqwest::Body::from(chunk.data), length)
            .file_name(format!("chunk-{}", chunk.chunk_index))
            .mime_str("application/octet-stream")?;
        // Text fields precede the binary part so the server can route the chunk.
        let form = Form::new()
            .text("uploadId", chunk.upload_id.clone())
            .text("chunkIndex", chunk.chunk_index.to_string())
            .text("totalChunks", chunk.total_chunks.to_string())
            .part("chunk", part);

        trace!(
            upload_id = %chunk.upload_id,
            chunk_index = chunk.chunk_index,
            bytes = length,
            "Sending chunk"
        );
        let response = self.post(url).multipart(form).send().await?;
        ensure_success(response, "chunk").await?;
        Ok(())
    }

    async fn finalize_session(&self, request: &FinalizeUploadRequest) -> Result<FinalizeResponse> {
        let url = self.endpoint(&self.endpoints.finalize)?;
        debug!(upload_id = %request.upload_id, %url, "Finalizing chunked upload");
        let response = self
            .post(url)
            .json(request)
            .timeout(self.finalize_timeout)
            .send()
            .await?;
        let response = ensure_success(response, "finalize").await?;
        let body = response.text().await?;
        let raw = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).map_err(|e| {
                UploadError::finalize_failed(format!("unreadable finalize response: {e}"))
            })?
        };
        FinalizeResponse::from_json(raw)
    }
}
