use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::state::JobState;

/// Flags a job that sits at 100% without a terminal event for too long.
#[derive(Debug, Clone)]
pub struct StuckJobDetector {
    window: Duration,
    armed_at: Option<Instant>,
    stuck: bool,
}

impl StuckJobDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed_at: None,
            stuck: false,
        }
    }

    /// Re-evaluate after `state` changed.
    pub fn observe(&mut self, state: &JobState, now: Instant) {
        if state.awaiting_terminal() {
            self.armed_at.get_or_insert(now);
        } else {
            self.armed_at = None;
            self.stuck = false;
        }
    }

    /// When the stuck flag would be raised, if armed and not raised yet.
    pub fn deadline(&self) -> Option<Instant> {
        if self.stuck {
            return None;
        }
        self.armed_at.map(|armed| armed + self.window)
    }

    /// Raise the flag once the window has passed. Returns `true` on the transition.
    pub fn poll_stuck(&mut self, job_id: &str, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.stuck = true;
                warn!(job_id, window = ?self.window, "Job appears stuck at 100%");
                true
            }
            _ => false,
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }
}
