use crate::error::PipelineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Event emitted by a chunk source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// One finished slice of the capture stream.
    ///
    /// `is_final` marks the flushed partial chunk emitted in response to
    /// `stop()`; the event channel closes after it.
    Chunk { payload: Vec<u8>, is_final: bool },
    /// Irrecoverable source loss (device unplugged, permission revoked).
    /// The channel closes after this event.
    Fatal { reason: String },
}

/// Capture source trait
///
/// Implementations own hardware access and slicing cadence; the capture
/// session only sees timestamped binary chunks. Sources deliver events
/// over a channel so the session never blocks a capture callback.
#[async_trait::async_trait]
pub trait ChunkSource: Send {
    /// Start capturing.
    ///
    /// Returns a channel receiver of source events, or
    /// `SourceUnavailable` if the source cannot be acquired.
    async fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, PipelineError>;

    /// Stop capturing: flush the final partial chunk, then close the
    /// event channel.
    async fn stop(&mut self) -> Result<(), PipelineError>;

    /// Whether the source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Synthetic chunk source emitting fixed-size payloads on a cadence.
///
/// Stands in for a hardware recorder in the CLI and in tests: every
/// `chunk_duration` it emits a `chunk_bytes`-sized payload, and on stop
/// it flushes one final partial chunk.
pub struct IntervalSource {
    chunk_duration: Duration,
    chunk_bytes: usize,
    capturing: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl IntervalSource {
    pub fn new(chunk_duration: Duration, chunk_bytes: usize) -> Self {
        Self {
            chunk_duration,
            chunk_bytes,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl ChunkSource for IntervalSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, PipelineError> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::SourceUnavailable(
                "interval source already capturing".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(16);
        let chunk_duration = self.chunk_duration;
        let chunk_bytes = self.chunk_bytes;
        let stop_signal = Arc::clone(&self.stop_signal);

        let task = tokio::spawn(async move {
            info!("Interval source started ({}s cadence)", chunk_duration.as_secs_f64());

            let mut ticker = tokio::time::interval(chunk_duration);
            ticker.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let payload = vec![0u8; chunk_bytes];
                        if tx
                            .send(SourceEvent::Chunk { payload, is_final: false })
                            .await
                            .is_err()
                        {
                            // Session went away; nothing left to capture for
                            break;
                        }
                    }
                    _ = stop_signal.notified() => {
                        // Flush the final partial chunk before closing
                        let partial = vec![0u8; chunk_bytes / 2];
                        if tx
                            .send(SourceEvent::Chunk { payload: partial, is_final: true })
                            .await
                            .is_err()
                        {
                            warn!("Receiver dropped before final chunk");
                        }
                        break;
                    }
                }
            }

            info!("Interval source stopped");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), PipelineError> {
        self.capturing.store(false, Ordering::SeqCst);
        self.stop_signal.notify_one();
        if let Some(task) = self.task.take() {
            task.await.ok();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "interval"
    }
}
