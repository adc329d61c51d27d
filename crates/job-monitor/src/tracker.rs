use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::event::JobEvent;
use crate::state::{JobPhase, JobState, RecentLimits, Transition};

/// Callbacks fired as a tracked job changes. All methods default to no-ops.
pub trait JobObserver: Send + Sync {
    /// Any accepted change, terminal ones included.
    fn on_update(&self, _state: &JobState) {}

    /// The job completed and the settle delay elapsed.
    fn on_finished(&self, _state: &JobState) {}

    /// The job reported a job-level error.
    fn on_failed(&self, _state: &JobState, _message: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {}

/// Owns the [`JobState`] of one job and reports its transitions.
pub struct JobProgressTracker {
    state: JobState,
    observer: Arc<dyn JobObserver>,
    settle_delay: Duration,
    finished_notified: bool,
}

impl JobProgressTracker {
    pub fn new(job_id: impl Into<String>, config: &MonitorConfig, observer: Arc<dyn JobObserver>) -> Self {
        let limits = RecentLimits {
            completed: config.recent_completed_limit,
            errors: config.recent_errors_limit,
        };
        Self {
            state: JobState::with_limits(job_id, limits),
            observer,
            settle_delay: config.settle_delay(),
            finished_notified: false,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn job_id(&self) -> &str {
        &self.state.job_id
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn apply(&mut self, event: &JobEvent) -> Transition {
        let transition = self.state.apply(event);
        match transition {
            Transition::Ignored => {
                debug!(job_id = %self.state.job_id, kind = ?event.kind(), "Event ignored");
            }
            Transition::Updated => self.observer.on_update(&self.state),
            Transition::Completed => {
                info!(job_id = %self.state.job_id, "Job completed");
                self.observer.on_update(&self.state);
            }
            Transition::Failed => {
                let message = self.state.error_message.clone().unwrap_or_default();
                warn!(job_id = %self.state.job_id, error = %message, "Job failed");
                self.observer.on_update(&self.state);
                self.observer.on_failed(&self.state, &message);
            }
        }
        transition
    }

    /// Forced completion failed.
    pub fn force_complete_failed(&mut self) {
        self.state.record_force_complete_failure();
        self.observer.on_update(&self.state);
    }

    /// Fire the finished callback once, after the settle delay.
    pub async fn settle_and_notify(&mut self) {
        if self.finished_notified || self.state.phase != JobPhase::Completed {
            return;
        }
        tokio::time::sleep(self.settle_delay).await;
        self.finished_notified = true;
        self.observer.on_finished(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<usize>,
        finished_at: Mutex<Option<Instant>>,
        failures: Mutex<Vec<String>>,
    }

    impl JobObserver for Recorder {
        fn on_update(&self, _state: &JobState) {
            *self.updates.lock() += 1;
        }

        fn on_finished(&self, _state: &JobState) {
            *self.finished_at.lock() = Some(Instant::now());
        }

        fn on_failed(&self, _state: &JobState, message: &str) {
            self.failures.lock().push(message.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finished_callback_waits_for_settle_delay() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = JobProgressTracker::new("job-1", &MonitorConfig::default(), recorder.clone());

        let start = Instant::now();
        assert_eq!(tracker.apply(&JobEvent::Completed), Transition::Completed);
        assert!(recorder.finished_at.lock().is_none());

        tracker.settle_and_notify().await;
        tracker.settle_and_notify().await;
        let finished = (*recorder.finished_at.lock()).expect("finished callback");
        assert_eq!(finished - start, Duration::from_secs(2));
    }

    #[test]
    fn failure_callback_fires_immediately() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = JobProgressTracker::new("job-1", &MonitorConfig::default(), recorder.clone());
        tracker.apply(&JobEvent::Error {
            message: "out of disk".to_string(),
        });
        assert_eq!(*recorder.failures.lock(), vec!["out of disk".to_string()]);
        assert_eq!(*recorder.updates.lock(), 1);
    }

    #[test]
    fn ignored_events_do_not_notify() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = JobProgressTracker::new("job-1", &MonitorConfig::default(), recorder.clone());
        tracker.apply(&JobEvent::Completed);
        tracker.apply(&JobEvent::Started { total_items: 3 });
        assert_eq!(*recorder.updates.lock(), 1);
    }
}
