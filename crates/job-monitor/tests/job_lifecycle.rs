//! Full job lifecycles driven through an in-process event hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use job_monitor::{
    EventHub, ItemStatus, JobApi, JobMonitor, JobObserver, JobPhase, JobState, JobStatus,
    MonitorConfig, MonitorError, PollStatus, Result,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

/// Status endpoint that is never expected to be reached while connected.
struct UnreachableApi;

#[async_trait]
impl JobApi for UnreachableApi {
    async fn fetch_status(&self, _job_id: &str) -> Result<JobStatus> {
        Err(MonitorError::ConnectionClosed)
    }

    async fn force_complete(&self, job_id: &str) -> Result<()> {
        Err(MonitorError::force_complete_failed(job_id, "unexpected call"))
    }
}

#[derive(Default)]
struct Recorder {
    finished: Mutex<Option<(Instant, f64)>>,
    failed: Mutex<Option<String>>,
    percents: Mutex<Vec<f64>>,
}

impl JobObserver for Recorder {
    fn on_update(&self, state: &JobState) {
        self.percents.lock().push(state.percent);
    }

    fn on_finished(&self, state: &JobState) {
        *self.finished.lock() = Some((Instant::now(), state.percent));
    }

    fn on_failed(&self, _state: &JobState, message: &str) {
        *self.failed.lock() = Some(message.to_string());
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn job_42_runs_to_completion() {
    let hub = Arc::new(EventHub::new());
    hub.set_connected(true);
    let recorder = Arc::new(Recorder::default());
    let monitor = JobMonitor::new(hub.clone(), Arc::new(UnreachableApi), MonitorConfig::default())
        .with_observer(recorder.clone());

    let handle = monitor.track("job-42");
    settle().await;

    hub.dispatch("job:started:job-42", &json!({"totalClips": 10}));
    settle().await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state.items.len(), 10);
    assert_eq!(snapshot.state.counts().pending, 10);

    for index in 0..10 {
        hub.dispatch(
            "job:clip:processing:job-42",
            &json!({"clipIndex": index, "clipData": {"title": format!("Play {index}"), "streamer": "sam"}}),
        );
        hub.dispatch(
            "job:clip:processed:job-42",
            &json!({"clipIndex": index, "clipData": {"title": format!("Play {index}")}, "processingTime": 900}),
        );
    }
    settle().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state.percent, 100.0);
    assert_eq!(snapshot.state.counts().done, 10);
    assert_eq!(snapshot.state.phase, JobPhase::Completing);
    assert_eq!(snapshot.state.recent_completed.len(), 3);
    assert_eq!(snapshot.state.recent_completed[0].title, "Play 9");
    assert!(
        snapshot
            .state
            .items
            .iter()
            .all(|item| item.status == ItemStatus::Done)
    );

    let completed_at = Instant::now();
    hub.dispatch("job:completed:job-42", &json!({}));
    let state = handle.wait().await;

    assert_eq!(state.phase, JobPhase::Completed);
    let (finished_at, percent) = (*recorder.finished.lock()).expect("finished callback");
    assert_eq!(percent, 100.0);
    assert_eq!(finished_at - completed_at, Duration::from_secs(2));
    assert!(recorder.failed.lock().is_none());

    let percents = recorder.percents.lock().clone();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(hub.listener_count("job:progress:job-42"), 0);
}

#[tokio::test(start_paused = true)]
async fn item_errors_do_not_fail_the_job_but_job_errors_do() {
    let hub = Arc::new(EventHub::new());
    hub.set_connected(true);
    let recorder = Arc::new(Recorder::default());
    let monitor = JobMonitor::new(hub.clone(), Arc::new(UnreachableApi), MonitorConfig::default())
        .with_observer(recorder.clone());

    let handle = monitor.track("job-8");
    settle().await;

    hub.dispatch("job:started:job-8", &json!({"totalClips": 3}));
    hub.dispatch(
        "job:clip:error:job-8",
        &json!({"clipIndex": 1, "clipData": {}, "error": "unsupported codec"}),
    );
    settle().await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state.phase, JobPhase::Processing);
    assert_eq!(snapshot.state.recent_errors[0].message, "unsupported codec");
    assert_eq!(snapshot.state.recent_errors[0].title, "Clip 2");

    hub.dispatch("job:error:job-8", &json!({"error": "storage offline"}));
    let state = handle.wait().await;
    assert_eq!(state.phase, JobPhase::Error);
    assert_eq!(recorder.failed.lock().as_deref(), Some("storage offline"));
    assert!(recorder.finished.lock().is_none());
}

#[tokio::test(start_paused = true)]
async fn polling_and_realtime_feed_the_same_state() {
    struct ProgressApi;

    #[async_trait]
    impl JobApi for ProgressApi {
        async fn fetch_status(&self, _job_id: &str) -> Result<JobStatus> {
            Ok(JobStatus {
                progress: 30.0,
                status: PollStatus::Running,
                message: Some("Rendering".to_string()),
            })
        }

        async fn force_complete(&self, _job_id: &str) -> Result<()> {
            Ok(())
        }
    }

    let hub = Arc::new(EventHub::new());
    let monitor = JobMonitor::new(hub.clone(), Arc::new(ProgressApi), MonitorConfig::default());
    let handle = monitor.track("job-5");
    settle().await;

    // Realtime reports further progress than the poll will.
    hub.dispatch("job:progress:job-5", &json!({"progress": 60, "processed": 6, "total": 10}));
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.state.percent, 60.0);
    assert_eq!(snapshot.state.processed, 6);
    assert_eq!(
        snapshot.state.display.as_ref().map(|d| d.message.as_str()),
        Some("Rendering")
    );
    assert!(!snapshot.connected);

    handle.force_complete().await.unwrap();
    let state = handle.wait().await;
    assert_eq!(state.phase, JobPhase::Completed);
}
