use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Wire framing spoken over the realtime websocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Socket.IO v4 text packets (`42["event", data]`).
    #[default]
    SocketIo,
    /// One JSON object per text frame: `{"event": "...", "data": {...}}`.
    Json,
}

/// Default timeout of one status poll or force-complete request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Timing and retention knobs for job tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Poll interval after `poll_failure_threshold` consecutive failures.
    pub poll_backoff_interval_ms: u64,
    pub poll_failure_threshold: u32,
    /// Timeout of one status poll or force-complete request.
    pub request_timeout_ms: u64,
    /// How long a job may sit at 100% without a terminal event.
    pub stuck_window_secs: u64,
    /// Delay between `completed` and the finished callback.
    pub settle_delay_ms: u64,
    pub recent_completed_limit: usize,
    pub recent_errors_limit: usize,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Websocket path relative to the server base URL.
    pub realtime_path: String,
    pub framing: Framing,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            poll_backoff_interval_ms: 5000,
            poll_failure_threshold: 3,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stuck_window_secs: 180,
            settle_delay_ms: 2000,
            recent_completed_limit: 3,
            recent_errors_limit: 10,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            realtime_path: "socket.io/".to_string(),
            framing: Framing::SocketIo,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.poll_backoff_interval_ms == 0 {
            return Err(MonitorError::configuration(
                "poll intervals must be greater than zero",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(MonitorError::configuration(
                "request_timeout_ms must be greater than zero",
            ));
        }
        if self.poll_failure_threshold == 0 {
            return Err(MonitorError::configuration(
                "poll_failure_threshold must be at least 1",
            ));
        }
        if self.stuck_window_secs == 0 {
            return Err(MonitorError::configuration(
                "stuck_window_secs must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_backoff_interval(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stuck_window(&self) -> Duration {
        Duration::from_secs(self.stuck_window_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Job status paths, relative to the API base URL; the job id is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobEndpoints {
    pub process_status: String,
    pub force_complete: String,
}

impl Default for JobEndpoints {
    fn default() -> Self {
        Self {
            process_status: "api/zips/process-status".to_string(),
            force_complete: "api/zips/force-complete".to_string(),
        }
    }
}

impl JobEndpoints {
    pub fn process_status_path(&self, job_id: &str) -> String {
        format!("{}/{job_id}", self.process_status.trim_end_matches('/'))
    }

    pub fn force_complete_path(&self, job_id: &str) -> String {
        format!("{}/{job_id}", self.force_complete.trim_end_matches('/'))
    }
}
