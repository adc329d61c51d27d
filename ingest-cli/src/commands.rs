use ingest_upload::{
    ChunkSource, FileSource, HttpIngestApi, UploadCoordinator, UploadMetadata,
    UploadProgressReporter,
};
use job_monitor::{EventBus, HttpJobApi, JobApi, JobMonitor, JobPhase, JobState, RealtimeConnection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::http::build_client;
use crate::output::{JobView, UploadView, format_status, stuck_banner};

pub struct CommandExecutor {
    config: AppConfig,
    client: reqwest::Client,
    quiet: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, quiet: bool) -> Result<Self> {
        Ok(Self {
            config,
            client: build_client()?,
            quiet,
        })
    }

    fn job_api(&self) -> Result<HttpJobApi> {
        Ok(
            HttpJobApi::new(self.client.clone(), self.config.server_url()?)
                .with_token(self.config.server.token.clone())
                .with_timeout(self.config.monitor.request_timeout()),
        )
    }

    /// Upload `file` in chunks, print the job id and optionally follow the job.
    pub async fn upload(
        &self,
        file: &Path,
        metadata: UploadMetadata,
        chunk_size: Option<u64>,
        watch: bool,
    ) -> Result<()> {
        let mut upload_config = self.config.upload.clone();
        if let Some(size) = chunk_size {
            upload_config.chunk_size = size;
        }

        let source = FileSource::open(file).await?;
        let api = HttpIngestApi::new(self.client.clone(), self.config.server_url()?, &upload_config)
            .with_token(self.config.server.token.clone());

        let (progress_tx, mut progress_rx) = mpsc::channel(64);
        let mut coordinator = UploadCoordinator::new(Arc::new(api), upload_config)
            .with_progress(UploadProgressReporter::new(progress_tx));

        let cancel = coordinator.cancellation_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling upload");
                cancel.cancel();
            }
        });

        let view = UploadView::new(source.name(), source.len(), self.quiet);
        info!(file = %file.display(), size = source.len(), "Starting upload");

        let result = {
            let upload = coordinator.start(&source, metadata);
            tokio::pin!(upload);
            loop {
                tokio::select! {
                    result = &mut upload => break result,
                    Some(progress) = progress_rx.recv() => view.update(&progress),
                }
            }
        };
        ctrl_c.abort();
        while let Ok(progress) = progress_rx.try_recv() {
            view.update(&progress);
        }

        let job_id = match result {
            Ok(job_id) => job_id,
            Err(e) => {
                view.abandon(&e.to_string());
                return Err(e.into());
            }
        };
        view.finish(&job_id);
        println!("Job ID: {job_id}");

        if watch {
            self.watch(&job_id, false).await?;
        }
        Ok(())
    }

    /// Follow `job_id` until it completes, fails or the operator interrupts.
    pub async fn watch(&self, job_id: &str, force_on_stuck: bool) -> Result<JobState> {
        let base_url = self.config.server_url()?;
        let mut connection = RealtimeConnection::connect(
            &base_url,
            self.config.server.token.clone(),
            &self.config.monitor,
        )?;
        let bus: Arc<dyn EventBus> = Arc::new(connection.hub().clone());
        let monitor = JobMonitor::new(bus, Arc::new(self.job_api()?), self.config.monitor.clone());

        let handle = monitor.track(job_id);
        let control = handle.control();
        let mut updates = handle.updates();
        let view = JobView::new(job_id, self.quiet);
        view.render(&updates.borrow_and_update().clone());

        let retry_delay = self.config.monitor.poll_backoff_interval();
        let mut next_force: Option<Instant> = None;
        let mut forced = false;
        let mut announced_stuck = false;
        let mut interrupted = false;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    view.render(&snapshot);
                    if snapshot.state.is_terminal() {
                        break;
                    }
                    if snapshot.stuck && !announced_stuck {
                        announced_stuck = true;
                        view.println(&stuck_banner(&snapshot));
                    }
                    if snapshot.stuck && force_on_stuck && !forced && next_force.is_none() {
                        next_force = Some(Instant::now());
                    }
                }
                _ = sleep_until(next_force.unwrap_or_else(Instant::now)), if next_force.is_some() => {
                    next_force = None;
                    match control.force_complete().await {
                        Ok(()) => {
                            forced = true;
                            view.println(&format!("Forced completion of job {job_id} accepted"));
                        }
                        Err(e) if e.is_retryable() => {
                            let label = control.snapshot().force_complete_label;
                            view.println(&format!("Force complete failed: {e}. Next: {label}"));
                            next_force = Some(Instant::now() + retry_delay);
                        }
                        Err(e) => {
                            view.println(&format!("Force complete failed: {e}"));
                            forced = true;
                        }
                    }
                }
                _ = &mut ctrl_c => {
                    interrupted = true;
                    break;
                }
            }
        }

        let state = if interrupted {
            debug!(job_id, "Watch interrupted");
            handle.shutdown().await
        } else {
            handle.wait().await
        };
        connection.disconnect().await;
        view.finish(&state);

        match state.phase {
            JobPhase::Completed => {
                println!("✓ Job {job_id} completed");
                Ok(state)
            }
            JobPhase::Error => Err(AppError::JobFailed {
                job_id: job_id.to_string(),
                message: state
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            phase => {
                println!("Stopped watching job {job_id} ({phase})");
                Ok(state)
            }
        }
    }

    pub async fn status(&self, job_id: &str) -> Result<()> {
        let status = self.job_api()?.fetch_status(job_id).await?;
        println!("{}", format_status(job_id, &status));
        Ok(())
    }

    pub async fn force_complete(&self, job_id: &str) -> Result<()> {
        self.job_api()?.force_complete(job_id).await?;
        println!("✓ Job {job_id} marked as completed");
        Ok(())
    }
}
