//! Durable registry of sessions whose uploads exhausted retries
//!
//! One record per session (never per chunk), aggregating every failed
//! sequence. Records survive restarts; retained payload bytes do not,
//! so a post-restart record can only be discarded, not auto-retried.

mod record;

pub use record::FailedUploadRecord;

use crate::chunk::Chunk;
use crate::error::PipelineError;
use crate::upload::UploadScheduler;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

struct LedgerInner {
    records: Vec<FailedUploadRecord>,
    /// Payload bytes kept for retry, keyed by session then sequence.
    /// In-memory only; lost on restart.
    retained: HashMap<String, BTreeMap<u64, Chunk>>,
}

/// Durable failure ledger, file-backed, safe for concurrent observers.
pub struct FailureLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl FailureLedger {
    /// Open the ledger file, creating an empty ledger if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory: {:?}", parent))?;
        }

        let records = if path.exists() {
            let bytes = fs::read(&path)
                .with_context(|| format!("Failed to read ledger: {:?}", path))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse ledger: {:?}", path))?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner {
                records,
                retained: HashMap::new(),
            }),
        })
    }

    /// Upsert a failure record and retain the chunk's bytes for retry.
    ///
    /// The first failure for a session creates the record; later ones
    /// update the reason and merge the sequence, keeping the original
    /// label and duration.
    pub async fn record_chunk_failure(
        &self,
        template: FailedUploadRecord,
        chunk: Chunk,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let session_id = chunk.session_id.clone();
        let sequence = chunk.sequence;

        match inner
            .records
            .iter_mut()
            .find(|r| r.session_id == session_id)
        {
            Some(existing) => {
                existing.reason = template.reason;
                if !existing.failed_sequences.contains(&sequence) {
                    existing.failed_sequences.push(sequence);
                    existing.failed_sequences.sort_unstable();
                }
            }
            None => {
                let mut record = template;
                record.failed_sequences = vec![sequence];
                inner.records.push(record);
            }
        }

        inner
            .retained
            .entry(session_id.clone())
            .or_default()
            .insert(sequence, chunk);

        self.save(&inner.records)?;
        warn!(
            "Recorded failed upload: session={} sequence={}",
            session_id, sequence
        );
        Ok(())
    }

    /// Upsert a whole-session failure with no retained bytes (used when
    /// reconciling a crashed session, where payloads are already gone).
    pub async fn record_lost_session(&self, record: FailedUploadRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;

        match inner
            .records
            .iter_mut()
            .find(|r| r.session_id == record.session_id)
        {
            Some(existing) => existing.reason = record.reason,
            None => inner.records.push(record),
        }

        self.save(&inner.records)
    }

    /// Note that a previously failed sequence has now been delivered.
    ///
    /// When the last failed sequence of a session recovers, the record
    /// and any retained bytes are dropped.
    pub async fn mark_recovered(&self, session_id: &str, sequence: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Most deliveries were never failed; nothing to do for them
        if !inner.records.iter().any(|r| r.session_id == session_id)
            && !inner.retained.contains_key(session_id)
        {
            return Ok(());
        }

        if let Some(chunks) = inner.retained.get_mut(session_id) {
            chunks.remove(&sequence);
            if chunks.is_empty() {
                inner.retained.remove(session_id);
            }
        }

        let mut removed = false;
        if let Some(record) = inner
            .records
            .iter_mut()
            .find(|r| r.session_id == session_id)
        {
            record.failed_sequences.retain(|&s| s != sequence);
            removed = record.failed_sequences.is_empty();
        }

        if removed {
            inner.records.retain(|r| r.session_id != session_id);
            info!("All failed chunks recovered, ledger record removed: {}", session_id);
        }

        self.save(&inner.records)
    }

    /// Re-submit every failed chunk of a session to the scheduler with
    /// attempts reset to zero.
    ///
    /// Fails with `NoSuchSession` when there is no record or the payload
    /// bytes are no longer retained (post-restart) — the caller must
    /// surface "re-record required".
    pub async fn retry(
        &self,
        session_id: &str,
        scheduler: &UploadScheduler,
    ) -> Result<usize, PipelineError> {
        let chunks: Vec<Chunk> = {
            let inner = self.inner.lock().await;
            if !inner.records.iter().any(|r| r.session_id == session_id) {
                return Err(PipelineError::NoSuchSession(session_id.to_string()));
            }
            match inner.retained.get(session_id) {
                Some(chunks) if !chunks.is_empty() => chunks.values().cloned().collect(),
                _ => return Err(PipelineError::NoSuchSession(session_id.to_string())),
            }
        };

        let count = chunks.len();
        info!("Retrying {} failed chunk(s) for session {}", count, session_id);
        scheduler.requeue(chunks).await;
        Ok(count)
    }

    /// Remove a record and drop its retained bytes. Irreversible.
    pub async fn discard(&self, session_id: &str) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;

        let before = inner.records.len();
        inner.records.retain(|r| r.session_id != session_id);
        if inner.records.len() == before {
            return Err(PipelineError::NoSuchSession(session_id.to_string()));
        }
        inner.retained.remove(session_id);

        self.save(&inner.records)
            .map_err(|e| PipelineError::Storage(e.to_string()))?;
        info!("Discarded failed upload record: {}", session_id);
        Ok(())
    }

    /// All records, newest recording first.
    pub async fn list(&self) -> Vec<FailedUploadRecord> {
        let inner = self.inner.lock().await;
        let mut records = inner.records.clone();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Whether retained payload bytes exist for a session.
    pub async fn has_retained(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .retained
            .get(session_id)
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    fn save(&self, records: &[FailedUploadRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write ledger temp file: {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move ledger into place: {:?}", self.path))?;
        Ok(())
    }
}
