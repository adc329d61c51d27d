use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{MonitorError, Result};
use crate::monitor::{JobControl, JobMonitor, JobSnapshot, MonitorHandle};
use crate::state::JobState;

/// Independent monitors for any number of jobs, keyed by job id.
pub struct JobRegistry {
    monitor: JobMonitor,
    jobs: Mutex<HashMap<String, MonitorHandle>>,
}

impl JobRegistry {
    pub fn new(monitor: JobMonitor) -> Self {
        Self {
            monitor,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking `job_id`; tracking an already tracked job is a no-op.
    pub fn track(&self, job_id: &str) -> watch::Receiver<JobSnapshot> {
        let mut jobs = self.jobs.lock();
        if let Some(handle) = jobs.get(job_id) {
            return handle.updates();
        }
        let handle = self.monitor.track(job_id);
        let updates = handle.updates();
        jobs.insert(job_id.to_string(), handle);
        debug!(job_id, tracked = jobs.len(), "Job registered");
        updates
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.lock().get(job_id).map(MonitorHandle::snapshot)
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    /// Tracked job ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn force_complete(&self, job_id: &str) -> Result<()> {
        self.control(job_id)?.force_complete().await
    }

    /// Stop tracking `job_id` and return its last state.
    pub async fn untrack(&self, job_id: &str) -> Option<JobState> {
        let handle = self.jobs.lock().remove(job_id)?;
        debug!(job_id, "Job unregistered");
        Some(handle.shutdown().await)
    }

    /// Stop every monitor.
    pub async fn shutdown(&self) {
        let handles: Vec<MonitorHandle> = self.jobs.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }

    fn control(&self, job_id: &str) -> Result<JobControl> {
        self.jobs
            .lock()
            .get(job_id)
            .map(MonitorHandle::control)
            .ok_or_else(|| MonitorError::UnknownJob {
                job_id: job_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockJobApi;
    use crate::bus::EventHub;
    use crate::config::MonitorConfig;
    use crate::state::JobPhase;
    use serde_json::json;
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_are_tracked_independently() {
        let hub = Arc::new(EventHub::new());
        hub.set_connected(true);
        let mut api = MockJobApi::new();
        api.expect_fetch_status().never();
        let registry = JobRegistry::new(JobMonitor::new(
            hub.clone(),
            Arc::new(api),
            MonitorConfig::default(),
        ));

        registry.track("job-b");
        registry.track("job-a");
        registry.track("job-a");
        assert_eq!(registry.list(), vec!["job-a".to_string(), "job-b".to_string()]);
        settle().await;

        hub.dispatch("job:started:job-a", &json!({"totalClips": 4}));
        hub.dispatch("job:error:job-b", &json!({"error": "bad archive"}));
        settle().await;

        let a = registry.snapshot("job-a").unwrap();
        assert_eq!(a.state.phase, JobPhase::Processing);
        assert_eq!(a.state.items.len(), 4);
        let b = registry.snapshot("job-b").unwrap();
        assert_eq!(b.state.phase, JobPhase::Error);

        let state = registry.untrack("job-a").await.unwrap();
        assert_eq!(state.items.len(), 4);
        assert!(!registry.is_tracked("job-a"));
        assert!(matches!(
            registry.force_complete("job-a").await,
            Err(MonitorError::UnknownJob { .. })
        ));
        registry.shutdown().await;
        assert!(registry.list().is_empty());
    }
}
