use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the capture pipeline to its callers.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The chunk source could not be acquired (hardware or permission
    /// denial). Fatal to the capture attempt, never retried.
    #[error("capture source unavailable: {0}")]
    SourceUnavailable(String),

    /// A ledger operation referenced a session with no record or no
    /// retained payload bytes. Auto-retry is impossible; re-capture is
    /// the only remediation.
    #[error("no retryable session: {0}")]
    NoSuchSession(String),

    /// A resumed snapshot shows undelivered chunks whose payload was
    /// only ever in memory. The recording is incomplete.
    #[error("recovery gap: session {session_id} lost {missing} undelivered chunk(s)")]
    RecoveryGap { session_id: String, missing: u64 },

    /// Durable state could not be read or written
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Outcome classification for a single upload attempt.
///
/// The scheduler's retry decision hangs on this split: transient errors
/// follow the backoff policy, permanent ones go straight to the ledger.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network failure, timeout, or server 5xx. Retryable.
    #[error("transient delivery error: {0}")]
    Transient(String),

    /// The server rejected the request (malformed, auth). Not retryable.
    #[error("permanent delivery error: {0}")]
    Permanent(String),

    /// The attempt exceeded its per-attempt timeout. Counts as transient.
    #[error("upload attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, DeliveryError::Permanent(_))
    }
}
