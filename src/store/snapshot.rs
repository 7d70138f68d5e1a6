use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted projection of a capture session plus its delivery counts.
///
/// Written after every mutating event; sufficient to reconcile the
/// session after an unplanned restart. Payload bytes are deliberately
/// absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoverySnapshot {
    /// Session identifier (server-side record key)
    pub session_id: String,

    /// Human label for ledger entries (e.g. subject name)
    pub label: String,

    /// When the recording started
    pub started_at: DateTime<Utc>,

    /// When this snapshot was written
    pub updated_at: DateTime<Utc>,

    /// Next sequence number the session would assign
    pub next_sequence: u64,

    /// Chunks acknowledged by the sink
    pub chunks_delivered: usize,

    /// Chunks admitted but not yet resolved (queued or in flight)
    pub chunks_pending: usize,

    /// Chunks that exhausted retries or were permanently rejected
    pub chunks_failed: usize,

    /// True while the session is in `recording` or `stopping`; a
    /// surviving snapshot with this set means the process died
    /// mid-capture and the session needs reconciliation.
    pub recording: bool,
}

impl RecoverySnapshot {
    /// Sequences admitted but never confirmed delivered.
    ///
    /// After a restart these chunks' bytes are gone, so this is the lost
    /// count a resume must account for.
    pub fn undelivered(&self) -> u64 {
        self.next_sequence.saturating_sub(self.chunks_delivered as u64)
    }

    /// Recorded duration in seconds, up to the last persisted event
    pub fn duration_seconds(&self) -> f64 {
        let elapsed = self.updated_at.signed_duration_since(self.started_at);
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}
