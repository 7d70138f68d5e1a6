use super::{RecoverySnapshot, SessionStateStore};
use anyhow::Result;
use std::sync::Mutex;

/// In-memory state store for tests and embedders that manage their own
/// durability.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Option<RecoverySnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStateStore for MemoryStateStore {
    async fn save(&self, snapshot: &RecoverySnapshot) -> Result<()> {
        *self.inner.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<RecoverySnapshot>> {
        Ok(self.inner.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap() = None;
        Ok(())
    }
}
