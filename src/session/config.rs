use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier, also the server-side record key
    pub session_id: String,

    /// Human label carried into failure ledger entries (e.g. subject name)
    pub label: String,

    /// Target slicing interval the chunk source is driven at
    pub chunk_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("capture-{}", uuid::Uuid::new_v4()),
            label: "untitled capture".to_string(),
            chunk_duration: Duration::from_secs(30),
        }
    }
}
