use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Percentage shown while chunks are still being transferred or finalized.
pub const PRE_FINALIZE_CAP: u8 = 99;

/// Aggregate progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// 1-based index of the chunk being transferred.
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub percent: u8,
}

impl UploadProgress {
    /// Progress before transferring chunk `index` (0-based): `round(index / total * 100)`,
    /// capped until finalize succeeds.
    pub fn before_chunk(index: u32, total_chunks: u32) -> Self {
        let percent = if total_chunks == 0 {
            0
        } else {
            let raw = (f64::from(index) / f64::from(total_chunks) * 100.0).round();
            (raw as u8).min(PRE_FINALIZE_CAP)
        };
        Self {
            current_chunk: (index + 1).min(total_chunks),
            total_chunks,
            percent,
        }
    }

    /// All chunks sent, finalize outstanding.
    pub fn awaiting_finalize(total_chunks: u32) -> Self {
        Self {
            current_chunk: total_chunks,
            total_chunks,
            percent: PRE_FINALIZE_CAP,
        }
    }

    pub fn finished(total_chunks: u32) -> Self {
        Self {
            current_chunk: total_chunks,
            total_chunks,
            percent: 100,
        }
    }
}

/// Fire-and-forget progress sink; a full or closed channel drops the update.
#[derive(Clone)]
pub struct UploadProgressReporter {
    tx: mpsc::Sender<UploadProgress>,
}

impl UploadProgressReporter {
    pub fn new(tx: mpsc::Sender<UploadProgress>) -> Self {
        Self { tx }
    }

    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel::<UploadProgress>(1);
        Self::new(tx)
    }

    pub fn report(&self, progress: UploadProgress) {
        let _ = self.tx.try_send(progress);
    }
}
