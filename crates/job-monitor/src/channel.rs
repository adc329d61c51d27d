use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::{EventBus, Subscription};
use crate::event::{JobEvent, JobEventKind};

/// All per-job listeners on an [`EventBus`], forwarding normalized events into one sink.
pub struct JobEventChannel {
    job_id: String,
    subscriptions: Vec<Subscription>,
}

impl JobEventChannel {
    /// Subscribe to every event of `job_id`.
    pub fn subscribe(
        bus: &dyn EventBus,
        job_id: impl Into<String>,
        sink: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        let job_id = job_id.into();
        let subscriptions = JobEventKind::ALL
            .into_iter()
            .map(|kind| {
                let sink = sink.clone();
                let job = job_id.clone();
                bus.subscribe(
                    &kind.event_name(&job_id),
                    Arc::new(move |payload: &Value| {
                        match JobEvent::from_payload(kind, payload) {
                            Ok(event) => {
                                // A closed sink means the tracker is gone.
                                let _ = sink.send(event);
                            }
                            Err(e) => {
                                warn!(job_id = %job, event = kind.topic(), error = %e, "Dropping malformed job event");
                            }
                        }
                    }),
                )
            })
            .collect();
        debug!(job_id = %job_id, "Subscribed to job events");
        Self {
            job_id,
            subscriptions,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }

    /// Remove every listener. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
        self.subscriptions.clear();
        debug!(job_id = %self.job_id, "Unsubscribed from job events");
    }
}

impl Drop for JobEventChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
