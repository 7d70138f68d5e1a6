//! Durable recovery state for the active capture session
//!
//! One key survives a process restart: the RecoverySnapshot of the
//! active session. It is bookkeeping only — raw chunk payloads are
//! never persisted, so recovery restores counts and status, not bytes.

mod file;
mod memory;
mod snapshot;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use snapshot::RecoverySnapshot;

use anyhow::Result;

/// Durable key/value persistence for the single active session.
///
/// `save` is only ever called from one serialized call site (the
/// scheduler's persist path), so implementations do not need their own
/// write locking.
#[async_trait::async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Overwrite the active-session snapshot
    async fn save(&self, snapshot: &RecoverySnapshot) -> Result<()>;

    /// Load the active-session snapshot, if one survived
    async fn load(&self) -> Result<Option<RecoverySnapshot>>;

    /// Remove the active-session snapshot (session reconciled)
    async fn clear(&self) -> Result<()>;
}
