use anyhow::Result;
use capture_uplink::{
    CaptureSession, Config, FailureLedger, FileStateStore, HttpUploadSink, IntervalSource,
    ResumeOutcome, SessionConfig, SessionStateStore, UploadScheduler,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "capture-uplink", about = "Resumable chunked capture and upload pipeline")]
struct Cli {
    /// Config file name (without extension)
    #[arg(long, default_value = "config/capture-uplink")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture for a fixed duration, uploading chunks as they slice
    Record {
        #[arg(long, default_value_t = 60)]
        seconds: u64,

        /// Session label shown in failure ledger entries
        #[arg(long)]
        label: Option<String>,
    },
    /// Reconcile a session interrupted by a crash or restart
    Resume,
    /// Inspect and act on uploads that exhausted retries
    Failed {
        #[command(subcommand)]
        action: FailedAction,
    },
}

#[derive(Subcommand)]
enum FailedAction {
    /// List failed uploads, newest first
    List,
    /// Re-submit a session's retained chunks
    Retry { session_id: String },
    /// Drop a record and its retained bytes. Irreversible.
    Discard { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    let store: Arc<dyn SessionStateStore> =
        Arc::new(FileStateStore::new(&cfg.storage.state_path)?);
    let ledger = Arc::new(FailureLedger::open(&cfg.storage.ledger_path)?);

    match cli.command {
        Command::Record { seconds, label } => {
            if let Some(snapshot) = store.load().await? {
                if snapshot.recording {
                    anyhow::bail!(
                        "Unreconciled session {} found; run `capture-uplink resume` first",
                        snapshot.session_id
                    );
                }
            }

            let sink = Arc::new(HttpUploadSink::new(cfg.upload.endpoint.as_str())?);
            let scheduler = UploadScheduler::new(
                sink,
                Arc::clone(&store),
                Arc::clone(&ledger),
                cfg.upload.policy(),
            );

            let session_config = SessionConfig {
                label: label.unwrap_or_else(|| cfg.capture.label.clone()),
                chunk_duration: Duration::from_secs(cfg.capture.chunk_duration_secs),
                ..Default::default()
            };
            info!("Session id: {}", session_config.session_id);

            let session = CaptureSession::new(session_config, scheduler, Arc::clone(&ledger));
            let source = IntervalSource::new(
                Duration::from_secs(cfg.capture.chunk_duration_secs),
                cfg.capture.chunk_bytes,
            );
            session.start(Box::new(source)).await?;

            let reporter = session.reporter();
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            let mut ticker = tokio::time::interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = ticker.tick() => {
                        let progress = reporter.snapshot();
                        info!(
                            "delivered={} pending={} failed={} elapsed={:.0}s",
                            progress.chunks_delivered,
                            progress.chunks_pending,
                            progress.chunks_failed,
                            progress.elapsed_seconds
                        );
                    }
                }
            }

            let final_progress = session.stop().await?;
            println!("{}", serde_json::to_string_pretty(&final_progress)?);
        }

        Command::Resume => match store.load().await? {
            None => println!("No recovery snapshot found; nothing to reconcile"),
            Some(snapshot) => {
                let outcome = CaptureSession::resume_from_snapshot(
                    snapshot,
                    Arc::clone(&store),
                    Arc::clone(&ledger),
                )
                .await?;
                match outcome {
                    ResumeOutcome::Completed { session_id } => {
                        println!("Session {} reconciled: every chunk was delivered", session_id);
                    }
                    ResumeOutcome::GapReported { session_id, lost_chunks } => {
                        println!(
                            "Session {} incomplete: {} chunk(s) lost, see `failed list`",
                            session_id, lost_chunks
                        );
                    }
                }
            }
        },

        Command::Failed { action } => match action {
            FailedAction::List => {
                let records = ledger.list().await;
                if records.is_empty() {
                    println!("No failed uploads");
                }
                for record in records {
                    println!(
                        "{}  {}  {}  {:.0}s  {} failed chunk(s)  {}",
                        record.session_id,
                        record.label,
                        record.started_at.format("%Y-%m-%d %H:%M:%S"),
                        record.duration_seconds,
                        record.failed_sequences.len(),
                        record.reason
                    );
                }
            }
            FailedAction::Retry { session_id } => {
                let sink = Arc::new(HttpUploadSink::new(cfg.upload.endpoint.as_str())?);
                let scheduler = UploadScheduler::new(
                    sink,
                    Arc::clone(&store),
                    Arc::clone(&ledger),
                    cfg.upload.policy(),
                );

                let count = ledger.retry(&session_id, &scheduler).await?;
                info!("Re-submitted {} chunk(s) for {}", count, session_id);
                scheduler.wait_idle(&session_id).await;

                let still_failed = scheduler.delivery_sets(&session_id).failed;
                if still_failed.is_empty() {
                    println!("Session {} fully delivered; record removed", session_id);
                } else {
                    println!(
                        "Session {}: {} chunk(s) failed again",
                        session_id,
                        still_failed.len()
                    );
                }
            }
            FailedAction::Discard { session_id } => {
                ledger.discard(&session_id).await?;
                println!("Discarded failed upload record: {}", session_id);
            }
        },
    }

    Ok(())
}
