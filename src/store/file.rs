use super::{RecoverySnapshot, SessionStateStore};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// File-backed state store: one JSON file holding the active session's
/// RecoverySnapshot.
///
/// Writes go to a temp file first, then rename into place, so a crash
/// mid-write can never leave a corrupt snapshot behind.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {:?}", parent))?;
        }
        Ok(Self { path })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait::async_trait]
impl SessionStateStore for FileStateStore {
    async fn save(&self, snapshot: &RecoverySnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write snapshot temp file: {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move snapshot into place: {:?}", self.path))?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<RecoverySnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read snapshot: {:?}", self.path))?;
        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse snapshot: {:?}", self.path))?;
        Ok(Some(snapshot))
    }

    async fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove snapshot: {:?}", self.path))?;
            info!("Cleared recovery snapshot at {:?}", self.path);
        }
        Ok(())
    }
}
