use super::retry::RetryPolicy;
use super::sink::UploadSink;
use crate::chunk::{Chunk, ChunkCounts, DeliverySets, DeliveryState};
use crate::error::DeliveryError;
use crate::ledger::{FailedUploadRecord, FailureLedger};
use crate::store::{RecoverySnapshot, SessionStateStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Delivery tunables. All of these are policy, not protocol: callers
/// override them through configuration.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Maximum chunks in flight at once
    pub concurrency: usize,
    /// Attempts per chunk before it is declared failed
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Per-attempt timeout; expiry counts as a transient failure
    pub attempt_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Bookkeeping the active session shares with the scheduler so snapshot
/// writes have one call site.
#[derive(Clone)]
pub struct ActiveSessionContext {
    pub session_id: String,
    pub label: String,
    pub started_at: DateTime<Utc>,
    /// Next sequence the session will assign (owned by the session,
    /// read here for snapshots)
    pub next_sequence: Arc<AtomicU64>,
    /// True while the session is recording or stopping
    pub recording: Arc<AtomicBool>,
}

struct ChunkRecord {
    state: DeliveryState,
    attempts: u32,
    last_error: Option<String>,
}

struct SchedulerState {
    /// Per-session chunk bookkeeping. A chunk is present here from
    /// admission until its session is cancelled; delivered and failed
    /// chunks stay so the sets stay precise.
    sessions: HashMap<String, BTreeMap<u64, ChunkRecord>>,
    /// Sessions whose remaining work is abandoned
    cancelled: HashSet<String>,
    /// Most recent terminal delivery error, for the progress surface
    last_error: Option<String>,
    /// Snapshot context for the one active session
    active: Option<ActiveSessionContext>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    /// Serializes RecoverySnapshot writes: single-writer discipline for
    /// the active-session key even with concurrent upload workers
    persist_gate: tokio::sync::Mutex<()>,
    store: Arc<dyn SessionStateStore>,
    ledger: Arc<FailureLedger>,
    sink: Arc<dyn UploadSink>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    semaphore: Arc<Semaphore>,
    /// Signalled whenever a chunk reaches a terminal state
    resolved: Notify,
    tx: mpsc::UnboundedSender<Chunk>,
}

/// Delivers admitted chunks under a concurrency bound with
/// retry/backoff, reporting per-chunk outcome through the tracker the
/// progress reporter reads.
///
/// Cheaply cloneable; clones share one worker pool.
#[derive(Clone)]
pub struct UploadScheduler {
    shared: Arc<Shared>,
}

impl UploadScheduler {
    pub fn new(
        sink: Arc<dyn UploadSink>,
        store: Arc<dyn SessionStateStore>,
        ledger: Arc<FailureLedger>,
        policy: UploadPolicy,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Chunk>();

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                sessions: HashMap::new(),
                cancelled: HashSet::new(),
                last_error: None,
                active: None,
            }),
            persist_gate: tokio::sync::Mutex::new(()),
            store,
            ledger,
            sink,
            retry: RetryPolicy::new(policy.max_attempts, policy.base_delay, policy.max_delay),
            attempt_timeout: policy.attempt_timeout,
            semaphore: Arc::new(Semaphore::new(policy.concurrency.max(1))),
            resolved: Notify::new(),
            tx,
        });

        // Dispatcher: admits queued chunks to workers in FIFO order,
        // bounded by the semaphore.
        let dispatch = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if dispatch.is_cancelled(&chunk.session_id) {
                    continue;
                }
                let permit = match Arc::clone(&dispatch.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = Arc::clone(&dispatch);
                tokio::spawn(async move {
                    deliver(worker, permit, chunk).await;
                });
            }
            info!("Upload dispatcher stopped");
        });

        Self { shared }
    }

    /// Register the active session so snapshot writes can project its
    /// fields. Persists the initial snapshot.
    pub async fn bind_session(&self, ctx: ActiveSessionContext) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.sessions.entry(ctx.session_id.clone()).or_default();
            state.cancelled.remove(&ctx.session_id);
            state.active = Some(ctx);
        }
        self.persist_snapshot().await;
    }

    /// Admit one chunk for delivery. Never blocks on network I/O; the
    /// chunk is tracked as pending, queued, and the updated snapshot is
    /// persisted before returning.
    ///
    /// Chunks for a cancelled session are refused at the door. A
    /// straggler from an event loop still draining its source must not
    /// leave a pending record no worker will ever resolve.
    pub async fn enqueue(&self, chunk: Chunk) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.cancelled.contains(&chunk.session_id) {
                debug!(
                    "Refusing chunk for cancelled session {}: sequence={}",
                    chunk.session_id, chunk.sequence
                );
                return;
            }
            state
                .sessions
                .entry(chunk.session_id.clone())
                .or_default()
                .insert(
                    chunk.sequence,
                    ChunkRecord {
                        state: DeliveryState::Pending,
                        attempts: 0,
                        last_error: None,
                    },
                );
        }
        if self.shared.tx.send(chunk).is_err() {
            error!("Upload dispatcher is gone; chunk not queued");
        }
        self.persist_snapshot().await;
    }

    /// Re-admit previously failed chunks with attempts reset to zero.
    pub async fn requeue(&self, chunks: Vec<Chunk>) {
        {
            let mut state = self.shared.state.lock().unwrap();
            for chunk in &chunks {
                state.cancelled.remove(&chunk.session_id);
                state
                    .sessions
                    .entry(chunk.session_id.clone())
                    .or_default()
                    .insert(
                        chunk.sequence,
                        ChunkRecord {
                            state: DeliveryState::Pending,
                            attempts: 0,
                            last_error: None,
                        },
                    );
            }
        }
        for chunk in chunks {
            if self.shared.tx.send(chunk).is_err() {
                error!("Upload dispatcher is gone; chunk not queued");
            }
        }
        self.persist_snapshot().await;
    }

    /// Abandon all pending and queued work for a session. In-flight
    /// attempts finish naturally; chunks already delivered stay
    /// delivered server-side.
    pub async fn cancel_session(&self, session_id: &str) {
        let was_active = {
            let mut state = self.shared.state.lock().unwrap();
            state.cancelled.insert(session_id.to_string());
            state.sessions.remove(session_id);
            let was_active = state
                .active
                .as_ref()
                .map(|ctx| ctx.session_id == session_id)
                .unwrap_or(false);
            if was_active {
                state.active = None;
            }
            was_active
        };

        if was_active {
            if let Err(e) = self.shared.store.clear().await {
                error!("Failed to clear snapshot for cancelled session: {:#}", e);
            }
        }

        self.shared.resolved.notify_waiters();
        info!("Cancelled session {}", session_id);
    }

    /// Wait until no chunk of this session is pending or in flight.
    pub async fn wait_idle(&self, session_id: &str) {
        loop {
            let notified = self.shared.resolved.notified();
            if self.counts(session_id).pending == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Chunk counts for one session
    pub fn counts(&self, session_id: &str) -> ChunkCounts {
        let state = self.shared.state.lock().unwrap();
        let mut counts = ChunkCounts::default();
        if let Some(chunks) = state.sessions.get(session_id) {
            for record in chunks.values() {
                match record.state {
                    DeliveryState::Delivered => counts.delivered += 1,
                    DeliveryState::Pending | DeliveryState::InFlight => counts.pending += 1,
                    DeliveryState::Failed => counts.failed += 1,
                }
            }
        }
        counts
    }

    /// Exact per-state sequence sets for one session
    pub fn delivery_sets(&self, session_id: &str) -> DeliverySets {
        let state = self.shared.state.lock().unwrap();
        let mut sets = DeliverySets::default();
        if let Some(chunks) = state.sessions.get(session_id) {
            for (&sequence, record) in chunks {
                match record.state {
                    DeliveryState::Delivered => sets.delivered.insert(sequence),
                    DeliveryState::Pending | DeliveryState::InFlight => {
                        sets.pending.insert(sequence)
                    }
                    DeliveryState::Failed => sets.failed.insert(sequence),
                };
            }
        }
        sets
    }

    /// Most recent terminal delivery error
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().unwrap().last_error.clone()
    }

    /// Persist the active session's RecoverySnapshot.
    ///
    /// The session's stop path calls this directly after flipping its
    /// recording flag; workers call it after every state change. The
    /// gate keeps writes serialized and each write freshly computed.
    pub async fn persist_snapshot(&self) {
        self.shared.persist_snapshot().await;
    }

    /// Drop all delivery bookkeeping for a reconciled session.
    ///
    /// Called once a session's final progress has been read; an
    /// embedder running many sessions over one scheduler would
    /// otherwise accumulate a chunk map per session forever.
    pub fn release_session(&self, session_id: &str) {
        let mut state = self.shared.state.lock().unwrap();
        state.sessions.remove(session_id);
        state.cancelled.remove(session_id);
    }

    /// Drop the active session's snapshot once it is reconciled.
    pub async fn clear_active_session(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.active = None;
        }
        if let Err(e) = self.shared.store.clear().await {
            error!("Failed to clear recovery snapshot: {:#}", e);
        }
    }
}

impl Shared {
    fn is_cancelled(&self, session_id: &str) -> bool {
        self.state.lock().unwrap().cancelled.contains(session_id)
    }

    fn set_chunk_state(&self, chunk: &Chunk, new_state: DeliveryState) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state
            .sessions
            .get_mut(&chunk.session_id)
            .and_then(|chunks| chunks.get_mut(&chunk.sequence))
        {
            record.state = new_state;
        }
    }

    /// Record a failed attempt, returning the new attempt count
    fn note_attempt_failure(&self, chunk: &Chunk, err: &DeliveryError) -> u32 {
        let mut state = self.state.lock().unwrap();
        match state
            .sessions
            .get_mut(&chunk.session_id)
            .and_then(|chunks| chunks.get_mut(&chunk.sequence))
        {
            Some(record) => {
                record.attempts += 1;
                record.last_error = Some(err.to_string());
                record.attempts
            }
            None => u32::MAX, // session cancelled mid-attempt
        }
    }

    async fn persist_snapshot(&self) {
        let _gate = self.persist_gate.lock().await;

        let snapshot = {
            let state = self.state.lock().unwrap();
            let Some(ctx) = state.active.as_ref() else {
                return;
            };

            let mut counts = ChunkCounts::default();
            if let Some(chunks) = state.sessions.get(&ctx.session_id) {
                for record in chunks.values() {
                    match record.state {
                        DeliveryState::Delivered => counts.delivered += 1,
                        DeliveryState::Pending | DeliveryState::InFlight => counts.pending += 1,
                        DeliveryState::Failed => counts.failed += 1,
                    }
                }
            }

            RecoverySnapshot {
                session_id: ctx.session_id.clone(),
                label: ctx.label.clone(),
                started_at: ctx.started_at,
                updated_at: Utc::now(),
                next_sequence: ctx.next_sequence.load(Ordering::SeqCst),
                chunks_delivered: counts.delivered,
                chunks_pending: counts.pending,
                chunks_failed: counts.failed,
                recording: ctx.recording.load(Ordering::SeqCst),
            }
        };

        if let Err(e) = self.store.save(&snapshot).await {
            error!("Failed to persist recovery snapshot: {:#}", e);
        }
    }

    /// Ledger record template for a failing chunk. Uses the active
    /// session's label and timing when available; a retried session
    /// that is no longer active keeps its original label through the
    /// ledger's upsert.
    fn failure_record(&self, chunk: &Chunk, reason: &str) -> FailedUploadRecord {
        let state = self.state.lock().unwrap();
        match state.active.as_ref() {
            Some(ctx) if ctx.session_id == chunk.session_id => {
                let elapsed = Utc::now().signed_duration_since(ctx.started_at);
                FailedUploadRecord::new(
                    chunk.session_id.clone(),
                    ctx.label.clone(),
                    ctx.started_at,
                    elapsed.num_milliseconds().max(0) as f64 / 1000.0,
                    reason,
                )
            }
            _ => FailedUploadRecord::new(
                chunk.session_id.clone(),
                chunk.session_id.clone(),
                chunk.recorded_at,
                0.0,
                reason,
            ),
        }
    }
}

/// One chunk's delivery loop: attempt, classify, back off, repeat.
///
/// Holds an upload slot only while a network call is running; backoff
/// sleeps release the slot so a retrying chunk cannot starve the pool.
async fn deliver(shared: Arc<Shared>, first_permit: OwnedSemaphorePermit, chunk: Chunk) {
    let mut permit = Some(first_permit);

    loop {
        if shared.is_cancelled(&chunk.session_id) {
            return;
        }

        let slot = match permit.take() {
            Some(slot) => slot,
            None => match Arc::clone(&shared.semaphore).acquire_owned().await {
                Ok(slot) => slot,
                Err(_) => return,
            },
        };

        shared.set_chunk_state(&chunk, DeliveryState::InFlight);

        let attempt = tokio::time::timeout(
            shared.attempt_timeout,
            shared
                .sink
                .put_chunk(&chunk.session_id, chunk.sequence, &chunk.payload),
        )
        .await;
        drop(slot);

        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(shared.attempt_timeout)),
        };

        match result {
            Ok(()) => {
                shared.set_chunk_state(&chunk, DeliveryState::Delivered);
                info!(
                    "Delivered chunk: session={} sequence={}",
                    chunk.session_id, chunk.sequence
                );
                if let Err(e) = shared
                    .ledger
                    .mark_recovered(&chunk.session_id, chunk.sequence)
                    .await
                {
                    error!("Failed to update ledger after recovery: {:#}", e);
                }
                shared.persist_snapshot().await;
                shared.resolved.notify_waiters();
                return;
            }
            Err(err) => {
                let attempts = shared.note_attempt_failure(&chunk, &err);
                if attempts == u32::MAX {
                    // Session cancelled while the attempt was running
                    return;
                }

                if shared.retry.should_retry(attempts, &err) {
                    shared.set_chunk_state(&chunk, DeliveryState::Pending);
                    shared.persist_snapshot().await;
                    let delay = shared.retry.delay_for(attempts);
                    warn!(
                        "Chunk upload failed (attempt {}): session={} sequence={}, retrying in {:?}: {}",
                        attempts, chunk.session_id, chunk.sequence, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                shared.set_chunk_state(&chunk, DeliveryState::Failed);
                error!(
                    "Chunk upload failed terminally after {} attempt(s): session={} sequence={}: {}",
                    attempts, chunk.session_id, chunk.sequence, err
                );

                let reason = err.to_string();
                {
                    let mut state = shared.state.lock().unwrap();
                    state.last_error = Some(reason.clone());
                }

                let record = shared.failure_record(&chunk, &reason);
                if let Err(e) = shared.ledger.record_chunk_failure(record, chunk).await {
                    error!("Failed to write failure ledger: {:#}", e);
                }
                shared.persist_snapshot().await;
                shared.resolved.notify_waiters();
                return;
            }
        }
    }
}
