use crate::upload::UploadPolicy;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    /// Fixed slicing interval in seconds
    pub chunk_duration_secs: u64,
    /// Synthetic payload size per chunk (interval source)
    pub chunk_bytes: usize,
    /// Human label for ledger entries
    pub label: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 30,
            chunk_bytes: 64 * 1024,
            label: "untitled capture".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadConfig {
    /// Base URL of the chunk upload endpoint
    pub endpoint: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl UploadConfig {
    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Recovery snapshot file
    pub state_path: String,
    /// Failure ledger file
    pub ledger_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: "data/active-session.json".to_string(),
            ledger_path: "data/failed-uploads.json".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
