//! Status polling while the realtime transport is down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::config::MonitorConfig;
use crate::event::JobEvent;

/// Interval selection with failure backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
    backoff_interval: Duration,
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl PollSchedule {
    pub fn new(interval: Duration, backoff_interval: Duration, failure_threshold: u32) -> Self {
        Self {
            interval,
            backoff_interval,
            failure_threshold,
            consecutive_failures: 0,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.poll_interval(),
            config.poll_backoff_interval(),
            config.poll_failure_threshold,
        )
    }

    pub fn next_delay(&self) -> Duration {
        if self.is_backing_off() {
            self.backoff_interval
        } else {
            self.interval
        }
    }

    pub fn is_backing_off(&self) -> bool {
        self.consecutive_failures >= self.failure_threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A terminal status was received and forwarded.
    Terminal,
    Cancelled,
    /// Nobody consumes events anymore.
    SinkClosed,
}

/// Polls job status whenever `connected` reads `false`.
///
/// Request failures only widen the interval; they never fail the job.
pub struct PollingFallback {
    api: Arc<dyn JobApi>,
    job_id: String,
    schedule: PollSchedule,
}

impl PollingFallback {
    pub fn new(api: Arc<dyn JobApi>, job_id: impl Into<String>, schedule: PollSchedule) -> Self {
        Self {
            api,
            job_id: job_id.into(),
            schedule,
        }
    }

    pub async fn run(
        mut self,
        sink: mpsc::UnboundedSender<JobEvent>,
        mut connected: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> PollOutcome {
        // Set once the transport is gone for good.
        let mut transport_closed = false;

        loop {
            if !transport_closed && *connected.borrow_and_update() {
                debug!(job_id = %self.job_id, "Realtime connected, polling paused");
                tokio::select! {
                    _ = cancel.cancelled() => return PollOutcome::Cancelled,
                    changed = connected.changed() => {
                        if changed.is_err() {
                            transport_closed = true;
                        }
                        continue;
                    }
                }
            }

            let delay = self.schedule.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
                changed = connected.changed(), if !transport_closed => {
                    if changed.is_err() {
                        transport_closed = true;
                    }
                    continue;
                }
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                polled = self.api.fetch_status(&self.job_id) => polled,
            };
            match polled {
                Ok(status) => {
                    if self.schedule.is_backing_off() {
                        info!(job_id = %self.job_id, "Status polling recovered");
                    }
                    self.schedule.record_success();
                    let terminal = status.is_terminal();
                    for event in status.into_events() {
                        if sink.send(event).is_err() {
                            return PollOutcome::SinkClosed;
                        }
                    }
                    if terminal {
                        debug!(job_id = %self.job_id, "Terminal status received, polling stopped");
                        return PollOutcome::Terminal;
                    }
                }
                Err(e) => {
                    self.schedule.record_failure();
                    warn!(
                        job_id = %self.job_id,
                        failures = self.schedule.consecutive_failures(),
                        next_delay = ?self.schedule.next_delay(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Status poll failed"
                    );
                }
            }
        }
    }
}
