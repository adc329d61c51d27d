use chrono::{DateTime, Utc};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use ingest_upload::UploadProgress;
use job_monitor::{
    ItemStatus, JobPhase, JobSnapshot, JobState, JobStatus, PollStatus, format_elapsed,
};
use std::io::IsTerminal;
use std::time::Duration;

use crate::size::format_size;

const RECENT_ACTIVITY_LINES: usize = 5;

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn line_style() -> ProgressStyle {
    ProgressStyle::with_template("  {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Progress bar for a chunked upload.
pub struct UploadView {
    bar: ProgressBar,
}

impl UploadView {
    pub fn new(filename: &str, size: u64, quiet: bool) -> Self {
        let bar = if quiet || !std::io::stderr().is_terminal() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
            bar
        };
        bar.set_style(bar_style(
            "{spinner:.cyan} {prefix} [{bar:40.cyan/blue}] {pos:>3}% | {msg}",
        ));
        bar.set_prefix(format!("{filename} ({})", format_size(size)));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn update(&self, progress: &UploadProgress) {
        self.bar.set_position(u64::from(progress.percent));
        self.bar.set_message(upload_message(progress));
    }

    pub fn finish(&self, job_id: &str) {
        self.bar.set_position(100);
        self.bar.finish_with_message(format!("uploaded, job {job_id}"));
    }

    pub fn abandon(&self, reason: &str) {
        self.bar.abandon_with_message(reason.to_string());
    }
}

fn upload_message(progress: &UploadProgress) -> String {
    if progress.percent >= 100 {
        "done".to_string()
    } else if *progress == UploadProgress::awaiting_finalize(progress.total_chunks) {
        "finalizing".to_string()
    } else {
        format!(
            "chunk {}/{}",
            progress.current_chunk, progress.total_chunks
        )
    }
}

/// Live view of one processing job: a bar plus phase, counters and recent activity.
pub struct JobView {
    _multi: Option<MultiProgress>,
    bar: ProgressBar,
    lines: Vec<ProgressBar>,
}

impl JobView {
    pub fn new(job_id: &str, quiet: bool) -> Self {
        if quiet || !std::io::stderr().is_terminal() {
            return Self {
                _multi: None,
                bar: ProgressBar::hidden(),
                lines: Vec::new(),
            };
        }

        let multi = MultiProgress::new();
        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(bar_style(
            "{spinner:.green} {prefix} [{bar:40.green/blue}] {pos:>3}% | {msg}",
        ));
        bar.set_prefix(format!("job {job_id}"));
        bar.enable_steady_tick(Duration::from_millis(120));

        let lines = (0..RECENT_ACTIVITY_LINES + 2)
            .map(|_| {
                let line = multi.add(ProgressBar::new_spinner());
                line.set_style(line_style());
                line
            })
            .collect();

        Self {
            _multi: Some(multi),
            bar,
            lines,
        }
    }

    pub fn render(&self, snapshot: &JobSnapshot) {
        let now = Utc::now();
        self.bar.set_position(snapshot.state.percent.clamp(0.0, 100.0) as u64);
        self.bar.set_message(headline(snapshot, now));

        let mut text = vec![counters_line(&snapshot.state)];
        if snapshot.stuck {
            text.push(stuck_banner(snapshot));
        } else {
            text.push(String::new());
        }
        text.extend(activity_lines(&snapshot.state, RECENT_ACTIVITY_LINES));

        let padded = text.into_iter().chain(std::iter::repeat(String::new()));
        for (line, content) in self.lines.iter().zip(padded) {
            line.set_message(content);
        }
    }

    pub fn finish(&self, state: &JobState) {
        let message = match state.phase {
            JobPhase::Completed => "completed".to_string(),
            JobPhase::Error => format!(
                "failed: {}",
                state.error_message.as_deref().unwrap_or("unknown error")
            ),
            phase => phase.to_string(),
        };
        if state.phase == JobPhase::Completed {
            self.bar.finish_with_message(message);
        } else {
            self.bar.abandon_with_message(message);
        }
        for line in &self.lines {
            line.finish();
        }
    }

    /// Print above the bars without tearing them.
    pub fn println(&self, message: &str) {
        if self.bar.is_hidden() {
            eprintln!("{message}");
        } else {
            self.bar.println(message);
        }
    }
}

/// Phase message, elapsed time and ETA on one line.
pub fn headline(snapshot: &JobSnapshot, now: DateTime<Utc>) -> String {
    let state = &snapshot.state;
    let mut parts = Vec::new();

    match &state.display {
        Some(display) if !display.message.is_empty() => parts.push(display.message.clone()),
        _ => parts.push(state.phase.to_string()),
    }
    if let Some(item) = state.current_item() {
        parts.push(format!("{} ({})", item.title, item.streamer));
    }
    if let Some(elapsed) = state.elapsed(now) {
        parts.push(format_elapsed(elapsed));
    }
    if let Some(eta) = state.eta.as_deref().filter(|eta| !eta.is_empty()) {
        parts.push(format!("eta {eta}"));
    }
    if !snapshot.connected {
        parts.push("polling".to_string());
    }
    parts.join(" | ")
}

pub fn counters_line(state: &JobState) -> String {
    let counts = state.counts();
    format!(
        "{} done, {} processing, {} pending, {} failed",
        counts.done, counts.processing, counts.pending, counts.error
    )
}

pub fn stuck_banner(snapshot: &JobSnapshot) -> String {
    format!(
        "Job appears stuck at 100%. Use `ingest force-complete {}` or --force-on-stuck [{}]",
        snapshot.state.job_id, snapshot.force_complete_label
    )
}

pub fn activity_lines(state: &JobState, limit: usize) -> Vec<String> {
    state
        .recent_activity()
        .into_iter()
        .take(limit)
        .map(|item| {
            let detail = match item.status {
                ItemStatus::Done => match item.duration {
                    Some(d) => format!("done in {:.1}s", d.as_secs_f64()),
                    None => "done".to_string(),
                },
                ItemStatus::Error => format!(
                    "error: {}",
                    item.error.as_deref().unwrap_or("unknown error")
                ),
                ItemStatus::Processing => "processing".to_string(),
                ItemStatus::Pending => "pending".to_string(),
            };
            format!("#{} {} ({}) {}", item.index + 1, item.title, item.streamer, detail)
        })
        .collect()
}

pub fn format_status(job_id: &str, status: &JobStatus) -> String {
    let label = match status.status {
        PollStatus::Running => "running",
        PollStatus::Completed => "completed",
        PollStatus::Error => "error",
    };
    let mut out = format!("job {job_id}: {label} {:.0}%", status.progress);
    if let Some(message) = status.message.as_deref().filter(|m| !m.is_empty()) {
        out.push_str(" - ");
        out.push_str(message);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_monitor::JobEvent;

    fn snapshot(state: JobState, stuck: bool, connected: bool) -> JobSnapshot {
        JobSnapshot {
            force_complete_label: state.force_complete_label(),
            state,
            stuck,
            connected,
        }
    }

    #[test]
    fn upload_message_follows_phases() {
        assert_eq!(upload_message(&UploadProgress::before_chunk(1, 3)), "chunk 2/3");
        assert_eq!(upload_message(&UploadProgress::awaiting_finalize(3)), "finalizing");
        assert_eq!(upload_message(&UploadProgress::finished(3)), "done");
    }

    #[test]
    fn headline_shows_phase_message_and_transport() {
        let mut state = JobState::new("job-42");
        let now = Utc::now();
        state.apply_at(&JobEvent::Started { total_items: 2 }, now);
        state.apply(&JobEvent::Phase {
            label: "rendering".to_string(),
            message: "Rendering clips".to_string(),
        });

        let line = headline(&snapshot(state, false, false), now + chrono::Duration::seconds(65));
        assert!(line.starts_with("Rendering clips"), "{line}");
        assert!(line.contains("01:05"), "{line}");
        assert!(line.ends_with("polling"), "{line}");
    }

    #[test]
    fn stuck_banner_carries_retry_label() {
        let mut state = JobState::new("job-7");
        state.record_force_complete_failure();
        let banner = stuck_banner(&snapshot(state, true, true));
        assert!(banner.contains("ingest force-complete job-7"));
        assert!(banner.contains("Retry (Attempt 2)"));
    }

    #[test]
    fn status_line_is_compact() {
        let status = JobStatus {
            progress: 42.4,
            status: PollStatus::Running,
            message: Some("Rendering".to_string()),
        };
        assert_eq!(format_status("job-1", &status), "job job-1: running 42% - Rendering");
    }
}
