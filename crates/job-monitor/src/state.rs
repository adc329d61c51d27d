//! Job state and the fold that applies one [`JobEvent`] to it.
//!
//! The fold is pure and is fed identically from the realtime path and the
//! polling path. Progress never goes backwards while the job is active, item
//! statuses never regress, and a terminal job ignores everything after it.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::event::{ItemMeta, JobEvent};

/// Upper bound on tracked items; events addressing items past it are dropped.
pub const MAX_ITEMS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Processing,
    /// Progress reached 100% but no terminal event arrived yet.
    Completing,
    Completed,
    Error,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Error)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobPhase::Idle => "idle",
            JobPhase::Processing => "processing",
            JobPhase::Completing => "completing",
            JobPhase::Completed => "completed",
            JobPhase::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl ItemStatus {
    fn is_finished(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemState {
    pub index: usize,
    pub title: String,
    pub streamer: String,
    pub status: ItemStatus,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    #[serde(skip)]
    last_update: u64,
}

impl ItemState {
    fn pending(index: usize) -> Self {
        let meta = ItemMeta::placeholder(index);
        Self {
            index,
            title: meta.title,
            streamer: meta.streamer,
            status: ItemStatus::Pending,
            duration: None,
            error: None,
            last_update: 0,
        }
    }

    fn set_meta(&mut self, meta: &ItemMeta) {
        self.title.clone_from(&meta.title);
        self.streamer.clone_from(&meta.streamer);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedItem {
    pub index: usize,
    pub title: String,
    pub streamer: String,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub index: usize,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseDisplay {
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

/// What a call to [`JobState::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Dropped: the job is terminal, the event would move progress backwards
    /// or it addresses an item past [`MAX_ITEMS`].
    Ignored,
    Updated,
    Completed,
    Failed,
}

/// Size limits of the recent lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentLimits {
    pub completed: usize,
    pub errors: usize,
}

impl Default for RecentLimits {
    fn default() -> Self {
        Self {
            completed: 3,
            errors: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub job_id: String,
    pub phase: JobPhase,
    pub items: Vec<ItemState>,
    /// Index of the item being processed right now.
    pub current: Option<usize>,
    pub recent_completed: VecDeque<CompletedItem>,
    pub recent_errors: VecDeque<ItemFailure>,
    pub percent: f64,
    pub processed: usize,
    pub total: usize,
    pub eta: Option<String>,
    pub display: Option<PhaseDisplay>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub force_complete_retries: u32,
    #[serde(skip)]
    limits: RecentLimits,
    #[serde(skip)]
    seq: u64,
}

impl JobState {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self::with_limits(job_id, RecentLimits::default())
    }

    pub fn with_limits(job_id: impl Into<String>, limits: RecentLimits) -> Self {
        Self {
            job_id: job_id.into(),
            phase: JobPhase::Idle,
            items: Vec::new(),
            current: None,
            recent_completed: VecDeque::with_capacity(limits.completed),
            recent_errors: VecDeque::with_capacity(limits.errors),
            percent: 0.0,
            processed: 0,
            total: 0,
            eta: None,
            display: None,
            started_at: None,
            finished_at: None,
            error_message: None,
            force_complete_retries: 0,
            limits,
            seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, event: &JobEvent) -> Transition {
        self.apply_at(event, Utc::now())
    }

    pub fn apply_at(&mut self, event: &JobEvent, now: DateTime<Utc>) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        let items_needed = match event {
            JobEvent::Started { total_items } => Some(*total_items),
            JobEvent::ItemProcessing { index, .. }
            | JobEvent::ItemDone { index, .. }
            | JobEvent::ItemError { index, .. } => Some(index.saturating_add(1)),
            _ => None,
        };
        if let Some(needed) = items_needed.filter(|n| *n > MAX_ITEMS) {
            debug!(job_id = %self.job_id, needed, "Event addresses too many items, dropped");
            return Transition::Ignored;
        }
        self.seq += 1;

        match event {
            JobEvent::Started { total_items } => {
                self.started_at.get_or_insert(now);
                self.ensure_items(*total_items);
                self.total = self.total.max(*total_items);
                self.enter_processing();
            }
            JobEvent::ItemProcessing { index, meta } => {
                let seq = self.seq;
                let item = self.item_mut(*index);
                item.set_meta(meta);
                if item.status.is_finished() {
                    return Transition::Updated;
                }
                item.status = ItemStatus::Processing;
                item.last_update = seq;
                self.current = Some(*index);
                self.enter_processing();
            }
            JobEvent::ItemDone {
                index,
                meta,
                duration,
            } => {
                let seq = self.seq;
                let item = self.item_mut(*index);
                item.set_meta(meta);
                if item.status == ItemStatus::Done {
                    return Transition::Updated;
                }
                item.status = ItemStatus::Done;
                item.duration = *duration;
                item.error = None;
                item.last_update = seq;
                let completed = CompletedItem {
                    index: *index,
                    title: meta.title.clone(),
                    streamer: meta.streamer.clone(),
                    duration: *duration,
                };
                push_bounded(&mut self.recent_completed, completed, self.limits.completed);
                self.finish_item(*index);
            }
            JobEvent::ItemError {
                index,
                meta,
                message,
            } => {
                let seq = self.seq;
                let item = self.item_mut(*index);
                item.set_meta(meta);
                if item.status.is_finished() {
                    return Transition::Updated;
                }
                item.status = ItemStatus::Error;
                item.error = Some(message.clone());
                item.last_update = seq;
                let failure = ItemFailure {
                    index: *index,
                    title: meta.title.clone(),
                    message: message.clone(),
                };
                push_bounded(&mut self.recent_errors, failure, self.limits.errors);
                self.finish_item(*index);
            }
            JobEvent::Progress {
                percent,
                processed,
                total,
                eta,
            } => {
                if *percent < self.percent {
                    return Transition::Ignored;
                }
                self.percent = *percent;
                if let Some(processed) = processed {
                    self.processed = *processed;
                }
                if let Some(total) = total {
                    self.total = *total;
                }
                self.eta.clone_from(eta);
                self.enter_processing();
                self.check_completing();
            }
            JobEvent::Phase { label, message } => {
                self.display = Some(PhaseDisplay {
                    label: label.clone(),
                    message: message.clone(),
                });
            }
            JobEvent::Completed => {
                self.phase = JobPhase::Completed;
                self.percent = 100.0;
                self.processed = self.total.max(self.items.len());
                self.current = None;
                self.eta = None;
                self.finished_at = Some(now);
                return Transition::Completed;
            }
            JobEvent::Error { message } => {
                self.phase = JobPhase::Error;
                self.error_message = Some(message.clone());
                self.current = None;
                self.finished_at = Some(now);
                return Transition::Failed;
            }
        }
        Transition::Updated
    }

    /// Forced completion failed; the action stays available.
    pub fn record_force_complete_failure(&mut self) {
        self.force_complete_retries += 1;
    }

    pub fn force_complete_label(&self) -> String {
        if self.force_complete_retries == 0 {
            "Force Complete".to_string()
        } else {
            format!("Retry (Attempt {})", self.force_complete_retries + 1)
        }
    }

    /// Non-terminal and sitting at 100%.
    pub fn awaiting_terminal(&self) -> bool {
        !self.is_terminal() && self.percent >= 100.0
    }

    pub fn counts(&self) -> ItemCounts {
        self.items
            .iter()
            .fold(ItemCounts::default(), |mut counts, item| {
                match item.status {
                    ItemStatus::Pending => counts.pending += 1,
                    ItemStatus::Processing => counts.processing += 1,
                    ItemStatus::Done => counts.done += 1,
                    ItemStatus::Error => counts.error += 1,
                }
                counts
            })
    }

    /// Items that left `pending`, most recently touched first.
    pub fn recent_activity(&self) -> Vec<&ItemState> {
        let mut active: Vec<&ItemState> = self
            .items
            .iter()
            .filter(|item| item.status != ItemStatus::Pending)
            .collect();
        active.sort_by(|a, b| b.last_update.cmp(&a.last_update));
        active
    }

    pub fn current_item(&self) -> Option<&ItemState> {
        self.current.and_then(|index| self.items.get(index))
    }

    /// Time since the job started, frozen once it finished.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        (end - start).to_std().ok()
    }

    fn ensure_items(&mut self, len: usize) {
        while self.items.len() < len {
            let index = self.items.len();
            self.items.push(ItemState::pending(index));
        }
    }

    fn item_mut(&mut self, index: usize) -> &mut ItemState {
        self.ensure_items(index + 1);
        &mut self.items[index]
    }

    fn enter_processing(&mut self) {
        if self.phase == JobPhase::Idle {
            self.phase = JobPhase::Processing;
        }
    }

    fn finish_item(&mut self, index: usize) {
        if self.current == Some(index) {
            self.current = None;
        }
        self.enter_processing();

        let counts = self.counts();
        let finished = counts.done + counts.error;
        self.processed = self.processed.max(finished);
        self.total = self.total.max(self.items.len());
        if self.total > 0 {
            let derived = (finished as f64 / self.total as f64 * 100.0).min(100.0);
            self.percent = self.percent.max(derived);
        }
        self.check_completing();
    }

    fn check_completing(&mut self) {
        if self.percent >= 100.0 && !self.is_terminal() {
            self.phase = JobPhase::Completing;
        }
    }
}

fn push_bounded<T>(list: &mut VecDeque<T>, value: T, limit: usize) {
    list.push_front(value);
    list.truncate(limit);
}

/// `mm:ss`, minutes keep growing past 59.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(percent: f64) -> JobEvent {
        JobEvent::Progress {
            percent,
            processed: None,
            total: None,
            eta: None,
        }
    }

    fn processing(index: usize) -> JobEvent {
        JobEvent::ItemProcessing {
            index,
            meta: ItemMeta::placeholder(index),
        }
    }

    fn done(index: usize) -> JobEvent {
        JobEvent::ItemDone {
            index,
            meta: ItemMeta::placeholder(index),
            duration: Some(Duration::from_millis(1200)),
        }
    }

    #[test]
    fn progress_never_decreases() {
        let mut state = JobState::new("job-1");
        let mut seen = Vec::new();
        for p in [40.0, 25.0, 70.0] {
            state.apply(&progress(p));
            seen.push(state.percent);
        }
        assert_eq!(seen, vec![40.0, 40.0, 70.0]);
    }

    #[test]
    fn lower_progress_event_is_dropped_entirely() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Progress {
            percent: 50.0,
            processed: Some(5),
            total: Some(10),
            eta: Some("1m".to_string()),
        });
        let transition = state.apply(&JobEvent::Progress {
            percent: 30.0,
            processed: Some(3),
            total: Some(10),
            eta: Some("3m".to_string()),
        });
        assert_eq!(transition, Transition::Ignored);
        assert_eq!(state.processed, 5);
        assert_eq!(state.eta.as_deref(), Some("1m"));
    }

    #[test]
    fn started_moves_to_processing_with_pending_items() {
        let mut state = JobState::new("job-1");
        assert_eq!(state.phase, JobPhase::Idle);
        state.apply(&JobEvent::Started { total_items: 4 });
        assert_eq!(state.phase, JobPhase::Processing);
        assert_eq!(state.items.len(), 4);
        assert_eq!(state.counts().pending, 4);
        assert_eq!(state.items[2].title, "Clip 3");
        assert!(state.started_at.is_some());
    }

    #[test]
    fn interleaved_items_all_finish() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 5 });
        for event in [
            processing(0),
            processing(2),
            done(2),
            processing(1),
            done(0),
            processing(4),
            processing(3),
            done(4),
            done(1),
            done(3),
        ] {
            state.apply(&event);
        }
        let counts = state.counts();
        assert_eq!(counts.done, 5);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.processing, 0);
        assert_eq!(state.current, None);
    }

    #[test]
    fn duplicate_started_keeps_item_statuses() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 3 });
        state.apply(&done(1));
        state.apply(&JobEvent::Started { total_items: 3 });
        assert_eq!(state.items[1].status, ItemStatus::Done);
        assert_eq!(state.items.len(), 3);
    }

    #[test]
    fn items_beyond_started_count_grow_the_list() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 2 });
        state.apply(&processing(4));
        assert_eq!(state.items.len(), 5);
        assert_eq!(state.items[4].status, ItemStatus::Processing);
        assert_eq!(state.items[3].status, ItemStatus::Pending);
    }

    #[test]
    fn out_of_range_items_are_dropped() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 2 });

        let huge = JobEvent::ItemProcessing {
            index: usize::MAX,
            meta: ItemMeta::placeholder(0),
        };
        assert_eq!(state.apply(&huge), Transition::Ignored);
        assert_eq!(
            state.apply(&JobEvent::Started {
                total_items: 10_000_000_000
            }),
            Transition::Ignored
        );
        assert_eq!(state.apply(&done(MAX_ITEMS)), Transition::Ignored);
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.total, 2);

        assert_eq!(state.apply(&done(MAX_ITEMS - 1)), Transition::Updated);
        assert_eq!(state.items.len(), MAX_ITEMS);
    }

    #[test]
    fn finished_item_does_not_regress() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 2 });
        state.apply(&done(0));
        state.apply(&processing(0));
        assert_eq!(state.items[0].status, ItemStatus::Done);
        assert_eq!(state.current, None);
    }

    #[test]
    fn recent_lists_are_bounded_most_recent_first() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 20 });
        for index in 0..5 {
            state.apply(&done(index));
        }
        let recent: Vec<usize> = state.recent_completed.iter().map(|c| c.index).collect();
        assert_eq!(recent, vec![4, 3, 2]);

        for index in 5..17 {
            state.apply(&JobEvent::ItemError {
                index,
                meta: ItemMeta::placeholder(index),
                message: "decode failed".to_string(),
            });
        }
        assert_eq!(state.recent_errors.len(), 10);
        assert_eq!(state.recent_errors.front().map(|e| e.index), Some(16));
        assert_eq!(state.phase, JobPhase::Processing);
    }

    #[test]
    fn duplicate_done_is_not_appended_twice() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 3 });
        state.apply(&done(1));
        state.apply(&done(1));
        assert_eq!(state.recent_completed.len(), 1);
    }

    #[test]
    fn item_error_clears_current_slot() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 3 });
        state.apply(&processing(1));
        assert_eq!(state.current, Some(1));
        state.apply(&JobEvent::ItemError {
            index: 1,
            meta: ItemMeta::placeholder(1),
            message: "timeout".to_string(),
        });
        assert_eq!(state.current, None);
        assert_eq!(state.items[1].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn reaching_full_progress_enters_completing() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 2 });
        state.apply(&done(0));
        assert_eq!(state.percent, 50.0);
        state.apply(&done(1));
        assert_eq!(state.percent, 100.0);
        assert_eq!(state.phase, JobPhase::Completing);
        assert!(state.awaiting_terminal());
    }

    #[test]
    fn terminal_state_ignores_later_events() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 2 });
        assert_eq!(
            state.apply(&JobEvent::Error {
                message: "worker crashed".to_string()
            }),
            Transition::Failed
        );
        assert_eq!(state.apply(&JobEvent::Completed), Transition::Ignored);
        assert_eq!(state.apply(&progress(90.0)), Transition::Ignored);
        assert_eq!(state.phase, JobPhase::Error);
        assert_eq!(state.error_message.as_deref(), Some("worker crashed"));
    }

    #[test]
    fn completed_sets_full_progress() {
        let mut state = JobState::new("job-1");
        state.apply(&progress(10.0));
        assert_eq!(state.apply(&JobEvent::Completed), Transition::Completed);
        assert_eq!(state.percent, 100.0);
        assert!(!state.awaiting_terminal());
    }

    #[test]
    fn phase_event_only_changes_display() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Phase {
            label: "zipping".to_string(),
            message: "Building archive".to_string(),
        });
        assert_eq!(state.phase, JobPhase::Idle);
        assert_eq!(state.display.as_ref().map(|d| d.label.as_str()), Some("zipping"));
    }

    #[test]
    fn force_complete_label_counts_attempts() {
        let mut state = JobState::new("job-1");
        assert_eq!(state.force_complete_label(), "Force Complete");
        state.record_force_complete_failure();
        assert_eq!(state.force_complete_retries, 1);
        assert_eq!(state.force_complete_label(), "Retry (Attempt 2)");
        state.record_force_complete_failure();
        assert_eq!(state.force_complete_label(), "Retry (Attempt 3)");
    }

    #[test]
    fn recent_activity_is_most_recent_first() {
        let mut state = JobState::new("job-1");
        state.apply(&JobEvent::Started { total_items: 4 });
        state.apply(&processing(2));
        state.apply(&done(0));
        state.apply(&processing(3));
        let order: Vec<usize> = state.recent_activity().iter().map(|i| i.index).collect();
        assert_eq!(order, vec![3, 0, 2]);
    }

    #[test]
    fn elapsed_is_frozen_after_finish() {
        let start = Utc::now();
        let mut state = JobState::new("job-1");
        state.apply_at(&JobEvent::Started { total_items: 1 }, start);
        state.apply_at(&JobEvent::Completed, start + chrono::Duration::seconds(75));
        let later = start + chrono::Duration::seconds(500);
        assert_eq!(state.elapsed(later), Some(Duration::from_secs(75)));
        assert_eq!(format_elapsed(Duration::from_secs(75)), "01:15");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "62:05");
    }
}
