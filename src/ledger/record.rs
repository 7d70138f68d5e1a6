use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-facing ledger entry: one per session that exhausted delivery
/// retries, aggregating every failed sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedUploadRecord {
    /// Session identifier (server-side record key)
    pub session_id: String,

    /// Human label shown in remediation UIs (e.g. subject name)
    pub label: String,

    /// When the recording started
    pub started_at: DateTime<Utc>,

    /// Recorded duration in seconds at the time of failure
    pub duration_seconds: f64,

    /// Why delivery failed (latest reason wins on upsert)
    pub reason: String,

    /// Failed sequence numbers, ascending. Empty when the exact
    /// sequences are unknown (session reconciled after a crash).
    #[serde(default)]
    pub failed_sequences: Vec<u64>,
}

impl FailedUploadRecord {
    pub fn new(
        session_id: impl Into<String>,
        label: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_seconds: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            label: label.into(),
            started_at,
            duration_seconds,
            reason: reason.into(),
            failed_sequences: Vec::new(),
        }
    }
}
