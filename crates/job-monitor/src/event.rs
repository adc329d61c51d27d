//! Job event vocabulary and payload normalization.
//!
//! The server publishes one named event per kind, scoped by job id
//! (`job:progress:{jobId}`). Payloads are camelCase JSON and are normalized
//! here into [`JobEvent`] so the rest of the crate never touches raw JSON.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{MonitorError, Result};

pub const UNKNOWN_JOB_ERROR: &str = "An unknown error occurred";
const DEFAULT_STREAMER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Started,
    ItemProcessing,
    ItemDone,
    ItemError,
    Progress,
    Phase,
    Completed,
    Error,
}

impl JobEventKind {
    pub const ALL: [JobEventKind; 8] = [
        JobEventKind::Started,
        JobEventKind::ItemProcessing,
        JobEventKind::ItemDone,
        JobEventKind::ItemError,
        JobEventKind::Progress,
        JobEventKind::Phase,
        JobEventKind::Completed,
        JobEventKind::Error,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            JobEventKind::Started => "job:started",
            JobEventKind::ItemProcessing => "job:clip:processing",
            JobEventKind::ItemDone => "job:clip:processed",
            JobEventKind::ItemError => "job:clip:error",
            JobEventKind::Progress => "job:progress",
            JobEventKind::Phase => "job:phase",
            JobEventKind::Completed => "job:completed",
            JobEventKind::Error => "job:error",
        }
    }

    /// Full event name for one job, e.g. `job:clip:processed:job-42`.
    pub fn event_name(self, job_id: &str) -> String {
        format!("{}:{job_id}", self.topic())
    }

    /// Inverse of [`JobEventKind::event_name`].
    pub fn from_event_name(name: &str, job_id: &str) -> Option<Self> {
        let topic = name.strip_suffix(job_id)?.strip_suffix(':')?;
        Self::ALL.into_iter().find(|kind| kind.topic() == topic)
    }
}

/// Display metadata of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    pub title: String,
    pub streamer: String,
}

impl ItemMeta {
    /// Placeholder shown before the server reports real metadata.
    pub fn placeholder(index: usize) -> Self {
        Self {
            title: format!("Clip {}", index.saturating_add(1)),
            streamer: DEFAULT_STREAMER.to_string(),
        }
    }

    fn resolve(index: usize, data: Option<ClipData>) -> Self {
        let data = data.unwrap_or_default();
        let mut meta = Self::placeholder(index);
        if let Some(title) = data.title.filter(|t| !t.is_empty()) {
            meta.title = title;
        }
        if let Some(streamer) = data.streamer.filter(|s| !s.is_empty()) {
            meta.streamer = streamer;
        }
        meta
    }
}

/// A normalized job event.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started {
        total_items: usize,
    },
    ItemProcessing {
        index: usize,
        meta: ItemMeta,
    },
    ItemDone {
        index: usize,
        meta: ItemMeta,
        duration: Option<Duration>,
    },
    ItemError {
        index: usize,
        meta: ItemMeta,
        message: String,
    },
    Progress {
        percent: f64,
        processed: Option<usize>,
        total: Option<usize>,
        eta: Option<String>,
    },
    Phase {
        label: String,
        message: String,
    },
    Completed,
    Error {
        message: String,
    },
}

impl JobEvent {
    pub fn kind(&self) -> JobEventKind {
        match self {
            JobEvent::Started { .. } => JobEventKind::Started,
            JobEvent::ItemProcessing { .. } => JobEventKind::ItemProcessing,
            JobEvent::ItemDone { .. } => JobEventKind::ItemDone,
            JobEvent::ItemError { .. } => JobEventKind::ItemError,
            JobEvent::Progress { .. } => JobEventKind::Progress,
            JobEvent::Phase { .. } => JobEventKind::Phase,
            JobEvent::Completed => JobEventKind::Completed,
            JobEvent::Error { .. } => JobEventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed | JobEvent::Error { .. })
    }

    /// Decode the payload of a `kind` event.
    pub fn from_payload(kind: JobEventKind, payload: &Value) -> Result<Self> {
        let event = match kind {
            JobEventKind::Started => {
                let p: StartedPayload = decode(kind, payload)?;
                JobEvent::Started {
                    total_items: p.total_clips,
                }
            }
            JobEventKind::ItemProcessing => {
                let p: ItemPayload = decode(kind, payload)?;
                JobEvent::ItemProcessing {
                    index: p.clip_index,
                    meta: ItemMeta::resolve(p.clip_index, p.clip_data),
                }
            }
            JobEventKind::ItemDone => {
                let p: ItemPayload = decode(kind, payload)?;
                JobEvent::ItemDone {
                    index: p.clip_index,
                    meta: ItemMeta::resolve(p.clip_index, p.clip_data),
                    duration: p
                        .processing_time
                        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok()),
                }
            }
            JobEventKind::ItemError => {
                let p: ItemPayload = decode(kind, payload)?;
                JobEvent::ItemError {
                    index: p.clip_index,
                    meta: ItemMeta::resolve(p.clip_index, p.clip_data),
                    message: p.error.unwrap_or_else(|| "processing failed".to_string()),
                }
            }
            JobEventKind::Progress => {
                let p: ProgressPayload = decode(kind, payload)?;
                JobEvent::Progress {
                    percent: p.progress.clamp(0.0, 100.0),
                    processed: p.processed,
                    total: p.total,
                    eta: p.estimated_time_remaining.and_then(eta_text),
                }
            }
            JobEventKind::Phase => {
                let p: PhasePayload = decode(kind, payload)?;
                JobEvent::Phase {
                    label: p.phase,
                    message: p.message,
                }
            }
            JobEventKind::Completed => JobEvent::Completed,
            JobEventKind::Error => {
                let p: ErrorPayload = if payload.is_null() {
                    ErrorPayload::default()
                } else {
                    decode(kind, payload)?
                };
                JobEvent::Error {
                    message: p
                        .error
                        .or(p.message)
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| UNKNOWN_JOB_ERROR.to_string()),
                }
            }
        };
        Ok(event)
    }
}

fn decode<T: DeserializeOwned>(kind: JobEventKind, payload: &Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|e| MonitorError::decode(format!("{} payload: {e}", kind.topic())))
}

fn eta_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartedPayload {
    total_clips: usize,
}

#[derive(Default, Deserialize)]
struct ClipData {
    title: Option<String>,
    streamer: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload {
    clip_index: usize,
    #[serde(default)]
    clip_data: Option<ClipData>,
    #[serde(default)]
    processing_time: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressPayload {
    progress: f64,
    #[serde(default)]
    processed: Option<usize>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    estimated_time_remaining: Option<Value>,
}

#[derive(Deserialize)]
struct PhasePayload {
    #[serde(default)]
    phase: String,
    #[serde(default)]
    message: String,
}

#[derive(Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(JobEventKind::Started, "job:started:job-42")]
    #[case(JobEventKind::ItemProcessing, "job:clip:processing:job-42")]
    #[case(JobEventKind::ItemDone, "job:clip:processed:job-42")]
    #[case(JobEventKind::ItemError, "job:clip:error:job-42")]
    #[case(JobEventKind::Progress, "job:progress:job-42")]
    #[case(JobEventKind::Phase, "job:phase:job-42")]
    #[case(JobEventKind::Completed, "job:completed:job-42")]
    #[case(JobEventKind::Error, "job:error:job-42")]
    fn event_names_are_scoped_by_job(#[case] kind: JobEventKind, #[case] name: &str) {
        assert_eq!(kind.event_name("job-42"), name);
        assert_eq!(JobEventKind::from_event_name(name, "job-42"), Some(kind));
    }

    #[test]
    fn other_jobs_do_not_match() {
        assert_eq!(
            JobEventKind::from_event_name("job:progress:job-7", "job-42"),
            None
        );
        assert_eq!(JobEventKind::from_event_name("job:unknown:job-42", "job-42"), None);
    }

    #[rstest]
    #[case(json!({"clipIndex": 0, "processingTime": 1500}), Some(Duration::from_millis(1500)))]
    #[case(json!({"clipIndex": 0, "processingTime": 1e300}), None)]
    #[case(json!({"clipIndex": 0, "processingTime": -5}), None)]
    #[case(json!({"clipIndex": 0}), None)]
    fn processing_time_outside_duration_range_is_dropped(
        #[case] payload: Value,
        #[case] expected: Option<Duration>,
    ) {
        let event = JobEvent::from_payload(JobEventKind::ItemDone, &payload).unwrap();
        let JobEvent::ItemDone { duration, .. } = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(duration, expected);
    }

    #[test]
    fn largest_index_still_gets_a_placeholder() {
        let payload = json!({"clipIndex": usize::MAX});
        let event = JobEvent::from_payload(JobEventKind::ItemError, &payload).unwrap();
        let JobEvent::ItemError { index, meta, .. } = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(index, usize::MAX);
        assert_eq!(meta.title, format!("Clip {}", usize::MAX));
    }

    #[rstest]
    #[case(json!({"clipIndex": 2, "clipData": {"title": "Ace", "streamer": "sam"}}), "Ace", "sam")]
    #[case(json!({"clipIndex": 2, "clipData": {"title": ""}}), "Clip 3", "...")]
    #[case(json!({"clipIndex": 2}), "Clip 3", "...")]
    fn item_meta_falls_back_to_placeholders(
        #[case] payload: Value,
        #[case] title: &str,
        #[case] streamer: &str,
    ) {
        let event = JobEvent::from_payload(JobEventKind::ItemProcessing, &payload).unwrap();
        let JobEvent::ItemProcessing { index, meta } = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(index, 2);
        assert_eq!(meta.title, title);
        assert_eq!(meta.streamer, streamer);
    }

    #[test]
    fn processing_time_is_milliseconds() {
        let payload = json!({"clipIndex": 0, "processingTime": 1500});
        let event = JobEvent::from_payload(JobEventKind::ItemDone, &payload).unwrap();
        assert!(matches!(
            event,
            JobEvent::ItemDone { duration: Some(d), .. } if d == Duration::from_millis(1500)
        ));
    }

    #[test]
    fn progress_payload() {
        let payload = json!({
            "progress": 40.5,
            "processed": 4,
            "total": 10,
            "estimatedTimeRemaining": "2m 10s"
        });
        let event = JobEvent::from_payload(JobEventKind::Progress, &payload).unwrap();
        assert_eq!(
            event,
            JobEvent::Progress {
                percent: 40.5,
                processed: Some(4),
                total: Some(10),
                eta: Some("2m 10s".to_string()),
            }
        );
    }

    #[rstest]
    #[case(json!({"error": "disk full"}), "disk full")]
    #[case(json!({"message": "worker crashed"}), "worker crashed")]
    #[case(json!({}), UNKNOWN_JOB_ERROR)]
    #[case(Value::Null, UNKNOWN_JOB_ERROR)]
    fn job_error_message(#[case] payload: Value, #[case] expected: &str) {
        let event = JobEvent::from_payload(JobEventKind::Error, &payload).unwrap();
        assert_eq!(
            event,
            JobEvent::Error {
                message: expected.to_string()
            }
        );
        assert!(event.is_terminal());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = JobEvent::from_payload(JobEventKind::Started, &json!({"total": 3})).unwrap_err();
        assert!(matches!(err, MonitorError::Decode { .. }));
    }
}
