use super::session::SessionStatus;
use crate::upload::UploadScheduler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Point-in-time view of a session and its delivery progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: SessionStatus,
    pub chunks_delivered: usize,
    pub chunks_pending: usize,
    pub chunks_failed: usize,
    pub elapsed_seconds: f64,
    pub last_error: Option<String>,
}

/// Read-only projection over a session and its scheduler.
///
/// No side effects and no coordination needed; observers poll
/// `snapshot()` at whatever interval suits them.
#[derive(Clone)]
pub struct ProgressReporter {
    pub(super) session_id: String,
    pub(super) started_at: Arc<Mutex<DateTime<Utc>>>,
    pub(super) status: Arc<Mutex<SessionStatus>>,
    pub(super) scheduler: UploadScheduler,
}

impl ProgressReporter {
    pub fn snapshot(&self) -> ProgressSnapshot {
        let status = *self.status.lock().unwrap();
        let started_at = *self.started_at.lock().unwrap();
        let counts = self.scheduler.counts(&self.session_id);
        let elapsed = Utc::now().signed_duration_since(started_at);

        ProgressSnapshot {
            status,
            chunks_delivered: counts.delivered,
            chunks_pending: counts.pending,
            chunks_failed: counts.failed,
            elapsed_seconds: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
            last_error: self.scheduler.last_error(),
        }
    }
}
