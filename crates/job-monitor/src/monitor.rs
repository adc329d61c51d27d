//! Per-job monitoring task: realtime events, polling fallback, stuck detection
//! and forced completion, all folded into one tracker.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobApi;
use crate::bus::EventBus;
use crate::channel::JobEventChannel;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::JobEvent;
use crate::polling::{PollSchedule, PollingFallback};
use crate::state::JobState;
use crate::stuck::StuckJobDetector;
use crate::tracker::{JobObserver, JobProgressTracker, NoopObserver};

/// Point-in-time view of a tracked job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub stuck: bool,
    pub connected: bool,
    pub force_complete_label: String,
}

impl JobSnapshot {
    fn capture(state: &JobState, stuck: bool, connected: bool) -> Self {
        Self {
            state: state.clone(),
            stuck,
            connected,
            force_complete_label: state.force_complete_label(),
        }
    }
}

enum Command {
    ForceComplete { reply: oneshot::Sender<Result<()>> },
}

/// Cloneable control surface of a running monitor.
#[derive(Clone)]
pub struct JobControl {
    job_id: String,
    snapshot: watch::Receiver<JobSnapshot>,
    commands: mpsc::Sender<Command>,
}

impl JobControl {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that changes on every accepted update.
    pub fn updates(&self) -> watch::Receiver<JobSnapshot> {
        self.snapshot.clone()
    }

    /// Ask the server to complete the job.
    ///
    /// On failure the job's retry counter goes up by one and the job stays
    /// active, so the call can simply be repeated.
    pub async fn force_complete(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let terminal = || MonitorError::JobTerminal {
            job_id: self.job_id.clone(),
        };
        self.commands
            .send(Command::ForceComplete { reply })
            .await
            .map_err(|_| terminal())?;
        rx.await.map_err(|_| terminal())?
    }
}

/// Owner handle of a running monitor task.
pub struct MonitorHandle {
    control: JobControl,
    cancel: CancellationToken,
    task: JoinHandle<JobState>,
}

impl MonitorHandle {
    pub fn job_id(&self) -> &str {
        self.control.job_id()
    }

    pub fn control(&self) -> JobControl {
        self.control.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.control.snapshot()
    }

    pub fn updates(&self) -> watch::Receiver<JobSnapshot> {
        self.control.updates()
    }

    pub async fn force_complete(&self) -> Result<()> {
        self.control.force_complete().await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the job is terminal (after the settle delay for completions).
    pub async fn wait(self) -> JobState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(job_id = %self.control.job_id, "Monitor task ended abnormally: {e}");
                self.control.snapshot().state
            }
        }
    }

    /// Stop tracking: unsubscribe and stop polling.
    pub async fn shutdown(self) -> JobState {
        self.cancel.cancel();
        self.wait().await
    }
}

/// Spawns one monitor task per tracked job.
#[derive(Clone)]
pub struct JobMonitor {
    bus: Arc<dyn EventBus>,
    api: Arc<dyn JobApi>,
    config: MonitorConfig,
    observer: Arc<dyn JobObserver>,
}

impl JobMonitor {
    pub fn new(bus: Arc<dyn EventBus>, api: Arc<dyn JobApi>, config: MonitorConfig) -> Self {
        Self {
            bus,
            api,
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start tracking `job_id` in the background.
    pub fn track(&self, job_id: impl Into<String>) -> MonitorHandle {
        let job_id = job_id.into();
        let tracker = JobProgressTracker::new(job_id.clone(), &self.config, self.observer.clone());
        let connected = *self.bus.connection_state().borrow();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(JobSnapshot::capture(tracker.state(), false, connected));
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = MonitorTask {
            job_id: job_id.clone(),
            bus: self.bus.clone(),
            api: self.api.clone(),
            config: self.config.clone(),
            tracker,
            stuck: StuckJobDetector::new(self.config.stuck_window()),
            connected,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(task.run(commands_rx, cancel.clone()));

        MonitorHandle {
            control: JobControl {
                job_id,
                snapshot: snapshot_rx,
                commands: commands_tx,
            },
            cancel,
            task,
        }
    }
}

struct MonitorTask {
    job_id: String,
    bus: Arc<dyn EventBus>,
    api: Arc<dyn JobApi>,
    config: MonitorConfig,
    tracker: JobProgressTracker,
    stuck: StuckJobDetector,
    connected: bool,
    snapshot: watch::Sender<JobSnapshot>,
}

impl MonitorTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> JobState {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut channel = JobEventChannel::subscribe(self.bus.as_ref(), &self.job_id, events_tx.clone());

        let poll_cancel = cancel.child_token();
        let poller = tokio::spawn(
            PollingFallback::new(
                self.api.clone(),
                self.job_id.clone(),
                PollSchedule::from_config(&self.config),
            )
            .run(events_tx, self.bus.connection_state(), poll_cancel.clone()),
        );

        let mut connection = self.bus.connection_state();
        let mut connection_open = true;
        info!(job_id = %self.job_id, "Tracking job");

        loop {
            let deadline = self.stuck.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(job_id = %self.job_id, "Tracking cancelled");
                    break;
                }
                Some(event) = events.recv() => {
                    self.handle_event(&event);
                    if self.tracker.state().is_terminal() {
                        break;
                    }
                }
                Some(command) = commands.recv() => {
                    match command {
                        Command::ForceComplete { reply } => {
                            let result = self.force_complete().await;
                            let _ = reply.send(result);
                        }
                    }
                    if self.tracker.state().is_terminal() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.stuck.poll_stuck(&self.job_id, Instant::now()) {
                        self.publish();
                    }
                }
                changed = connection.changed(), if connection_open => {
                    match changed {
                        Ok(()) => {
                            self.connected = *connection.borrow_and_update();
                            debug!(job_id = %self.job_id, connected = self.connected, "Realtime connection changed");
                        }
                        Err(_) => {
                            connection_open = false;
                            self.connected = false;
                        }
                    }
                    self.publish();
                }
            }
        }

        channel.unsubscribe();
        poll_cancel.cancel();
        if let Err(e) = poller.await {
            warn!(job_id = %self.job_id, "Polling task ended abnormally: {e}");
        }
        // Pending commands observe a closed channel.
        drop(commands);

        self.tracker.settle_and_notify().await;
        self.publish();
        self.tracker.state().clone()
    }

    fn handle_event(&mut self, event: &JobEvent) {
        self.tracker.apply(event);
        self.stuck.observe(self.tracker.state(), Instant::now());
        self.publish();
    }

    async fn force_complete(&mut self) -> Result<()> {
        if self.tracker.state().is_terminal() {
            return Err(MonitorError::JobTerminal {
                job_id: self.job_id.clone(),
            });
        }
        info!(
            job_id = %self.job_id,
            attempt = self.tracker.state().force_complete_retries + 1,
            "Forcing job completion"
        );
        match self.api.force_complete(&self.job_id).await {
            Ok(()) => {
                self.handle_event(&JobEvent::Completed);
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Force complete failed");
                self.tracker.force_complete_failed();
                self.publish();
                Err(match e {
                    MonitorError::ForceCompleteFailed { .. } => e,
                    other => MonitorError::force_complete_failed(&self.job_id, other.to_string()),
                })
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(JobSnapshot::capture(
            self.tracker.state(),
            self.stuck.is_stuck(),
            self.connected,
        ));
    }
}
