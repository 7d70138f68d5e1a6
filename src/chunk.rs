use chrono::{DateTime, Utc};

/// One bounded, sequence-numbered slice of a capture stream.
///
/// Payload bytes live in memory only: they are dropped once the chunk is
/// delivered, or handed to the failure ledger for retry when delivery
/// exhausts its attempts.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Owning session (also the server-side record key)
    pub session_id: String,
    /// 0-based position in the stream, unique per session
    pub sequence: u64,
    /// Raw chunk bytes
    pub payload: Vec<u8>,
    /// When the source emitted this chunk
    pub recorded_at: DateTime<Utc>,
}

/// Delivery lifecycle of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Admitted, waiting for an upload slot
    Pending,
    /// An upload attempt is running
    InFlight,
    /// The sink acknowledged the upload
    Delivered,
    /// Retries exhausted or permanently rejected
    Failed,
}

/// Aggregate chunk counts for one session.
///
/// `pending` includes chunks currently in flight; observers only care
/// whether a chunk has resolved yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub delivered: usize,
    pub pending: usize,
    pub failed: usize,
}

impl ChunkCounts {
    pub fn total(&self) -> usize {
        self.delivered + self.pending + self.failed
    }
}

/// Exact per-state sequence sets for one session.
///
/// Delivery completion order may differ from sequence order, so gaps
/// (a failed sequence below a delivered one) are normal and must be
/// representable precisely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverySets {
    pub delivered: std::collections::BTreeSet<u64>,
    pub pending: std::collections::BTreeSet<u64>,
    pub failed: std::collections::BTreeSet<u64>,
}
