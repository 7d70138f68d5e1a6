use super::config::SessionConfig;
use super::progress::{ProgressReporter, ProgressSnapshot};
use crate::chunk::Chunk;
use crate::error::PipelineError;
use crate::ledger::{FailedUploadRecord, FailureLedger};
use crate::source::{ChunkSource, SourceEvent};
use crate::store::{RecoverySnapshot, SessionStateStore};
use crate::upload::{ActiveSessionContext, UploadScheduler};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Lifecycle of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Recording,
    Stopping,
    Completed,
    /// Fatal source error ended the session before `stop()`
    Abandoned,
}

/// Result of reconciling a crashed session's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// Every admitted chunk had been delivered; nothing was lost
    Completed { session_id: String },
    /// Undelivered chunks whose bytes are gone; a ledger record was
    /// written so the loss is visible and actionable
    GapReported { session_id: String, lost_chunks: u64 },
}

/// One recording attempt: owns chunk sequencing and drives the
/// scheduler and state store as source events arrive.
///
/// Callers hold their session handle directly; there is no ambient
/// "current recorder" singleton.
pub struct CaptureSession {
    config: SessionConfig,
    scheduler: UploadScheduler,
    ledger: Arc<FailureLedger>,

    started_at: Arc<StdMutex<chrono::DateTime<Utc>>>,
    status: Arc<StdMutex<SessionStatus>>,

    /// Monotone sequence counter; never reused, even for chunks that
    /// fail permanently
    next_sequence: Arc<AtomicU64>,

    /// Mirrored into every RecoverySnapshot
    recording: Arc<AtomicBool>,

    /// Final chunk count, known once the source has flushed on stop
    expected_total_chunks: StdMutex<Option<u64>>,

    source: Mutex<Option<Box<dyn ChunkSource>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    pub fn new(
        config: SessionConfig,
        scheduler: UploadScheduler,
        ledger: Arc<FailureLedger>,
    ) -> Self {
        Self {
            config,
            scheduler,
            ledger,
            started_at: Arc::new(StdMutex::new(Utc::now())),
            status: Arc::new(StdMutex::new(SessionStatus::Idle)),
            next_sequence: Arc::new(AtomicU64::new(0)),
            recording: Arc::new(AtomicBool::new(false)),
            expected_total_chunks: StdMutex::new(None),
            source: Mutex::new(None),
            event_task: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Final chunk count; `None` until the session has been stopped
    pub fn expected_total_chunks(&self) -> Option<u64> {
        *self.expected_total_chunks.lock().unwrap()
    }

    /// Start capturing from the given source.
    ///
    /// Fails with `SourceUnavailable` if the source cannot be acquired,
    /// leaving the session in `idle`. On success the session is
    /// `recording` and an initial RecoverySnapshot has been persisted.
    pub async fn start(&self, mut source: Box<dyn ChunkSource>) -> Result<(), PipelineError> {
        if self.status() != SessionStatus::Idle {
            warn!("Capture session already started: {}", self.config.session_id);
            return Ok(());
        }

        let mut events = source.start().await?;

        let started_at = Utc::now();
        *self.started_at.lock().unwrap() = started_at;
        *self.status.lock().unwrap() = SessionStatus::Recording;
        self.recording.store(true, Ordering::SeqCst);

        info!(
            "Capture session started: {} (source: {})",
            self.config.session_id,
            source.name()
        );

        self.scheduler
            .bind_session(ActiveSessionContext {
                session_id: self.config.session_id.clone(),
                label: self.config.label.clone(),
                started_at,
                next_sequence: Arc::clone(&self.next_sequence),
                recording: Arc::clone(&self.recording),
            })
            .await;

        let scheduler = self.scheduler.clone();
        let ledger = Arc::clone(&self.ledger);
        let status = Arc::clone(&self.status);
        let recording = Arc::clone(&self.recording);
        let next_sequence = Arc::clone(&self.next_sequence);
        let session_id = self.config.session_id.clone();
        let label = self.config.label.clone();

        // Event loop: the single writer for sequence assignment. Chunk
        // handoff is fire-and-forget; nothing here waits on the network.
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SourceEvent::Chunk { payload, is_final } => {
                        let sequence = next_sequence.fetch_add(1, Ordering::SeqCst);
                        scheduler
                            .enqueue(Chunk {
                                session_id: session_id.clone(),
                                sequence,
                                payload,
                                recorded_at: Utc::now(),
                            })
                            .await;
                        if is_final {
                            break;
                        }
                    }
                    SourceEvent::Fatal { reason } => {
                        error!(
                            "Capture source lost, abandoning session {}: {}",
                            session_id, reason
                        );
                        *status.lock().unwrap() = SessionStatus::Abandoned;
                        recording.store(false, Ordering::SeqCst);

                        let elapsed = Utc::now().signed_duration_since(started_at);
                        let record = FailedUploadRecord::new(
                            session_id.clone(),
                            label.clone(),
                            started_at,
                            elapsed.num_milliseconds().max(0) as f64 / 1000.0,
                            format!("capture source lost: {}", reason),
                        );
                        if let Err(e) = ledger.record_lost_session(record).await {
                            error!("Failed to record abandoned session: {:#}", e);
                        }
                        scheduler.persist_snapshot().await;
                        scheduler.clear_active_session().await;
                        break;
                    }
                }
            }
        });

        *self.event_task.lock().await = Some(task);
        *self.source.lock().await = Some(source);

        Ok(())
    }

    /// Stop the session: flush the source's final partial chunk, wait
    /// for every admitted chunk to resolve, then complete.
    ///
    /// Idempotent; calling on a session that is not recording returns
    /// the current progress unchanged.
    pub async fn stop(&self) -> Result<ProgressSnapshot> {
        {
            let mut status = self.status.lock().unwrap();
            if *status != SessionStatus::Recording {
                warn!("Stop is a no-op in {:?}", *status);
                drop(status);
                return Ok(self.progress());
            }
            *status = SessionStatus::Stopping;
        }

        info!("Stopping capture session: {}", self.config.session_id);
        self.scheduler.persist_snapshot().await;

        // Signal the source to flush its final partial chunk
        if let Some(mut source) = self.source.lock().await.take() {
            source.stop().await?;
        }

        // Drain remaining events so every chunk is handed off
        if let Some(task) = self.event_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Capture event task panicked: {}", e);
            }
        }

        let total = self.next_sequence.load(Ordering::SeqCst);
        *self.expected_total_chunks.lock().unwrap() = Some(total);

        // Completion waits for in-flight uploads to finish or fail
        // naturally; partially delivered work is not wasted.
        self.scheduler.wait_idle(&self.config.session_id).await;

        self.recording.store(false, Ordering::SeqCst);
        {
            let mut status = self.status.lock().unwrap();
            if *status == SessionStatus::Stopping {
                *status = SessionStatus::Completed;
            }
        }

        // Session is reconciled: failures live in the ledger, so the
        // recovery key can go. The final progress is read first; the
        // scheduler then evicts this session's chunk bookkeeping.
        let progress = self.progress();
        self.scheduler.clear_active_session().await;
        self.scheduler.release_session(&self.config.session_id);

        info!(
            "Capture session completed: {} ({} chunks, {} delivered, {} failed)",
            self.config.session_id, total, progress.chunks_delivered, progress.chunks_failed
        );
        Ok(progress)
    }

    /// Current progress without side effects
    pub fn progress(&self) -> ProgressSnapshot {
        self.reporter().snapshot()
    }

    /// Detached read-only observer for polling
    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            session_id: self.config.session_id.clone(),
            started_at: Arc::clone(&self.started_at),
            status: Arc::clone(&self.status),
            scheduler: self.scheduler.clone(),
        }
    }

    /// Reconcile a snapshot left behind by a process that died
    /// mid-capture.
    ///
    /// Capturing never resumes: the hardware handle is gone. Bookkeeping
    /// is restored instead, and any chunk that never reached `delivered`
    /// is reported through the ledger, since its bytes were only in the
    /// dead process's memory.
    pub async fn resume_from_snapshot(
        snapshot: RecoverySnapshot,
        store: Arc<dyn SessionStateStore>,
        ledger: Arc<FailureLedger>,
    ) -> Result<ResumeOutcome> {
        let session_id = snapshot.session_id.clone();

        if !snapshot.recording {
            info!("Snapshot for {} was already reconciled", session_id);
            store.clear().await?;
            return Ok(ResumeOutcome::Completed { session_id });
        }

        let lost = snapshot.undelivered();
        if lost == 0 {
            info!(
                "Resumed session {} had every chunk delivered; closing",
                session_id
            );
            store.clear().await?;
            return Ok(ResumeOutcome::Completed { session_id });
        }

        warn!(
            "Resumed session {} lost {} undelivered chunk(s); recording gap",
            session_id, lost
        );

        let reason = PipelineError::RecoveryGap {
            session_id: session_id.clone(),
            missing: lost,
        }
        .to_string();

        ledger
            .record_lost_session(FailedUploadRecord::new(
                session_id.clone(),
                snapshot.label.clone(),
                snapshot.started_at,
                snapshot.duration_seconds(),
                reason,
            ))
            .await?;
        store.clear().await?;

        Ok(ResumeOutcome::GapReported {
            session_id,
            lost_chunks: lost,
        })
    }
}
