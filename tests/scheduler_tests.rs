// Integration tests for the upload scheduler
//
// These tests verify retry/backoff behaviour, precise delivery set
// tracking, failure-ledger escalation, and per-session cancellation.

use anyhow::Result;
use capture_uplink::{
    Chunk, FailureLedger, MemorySink, MemoryStateStore, UploadPolicy, UploadScheduler,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_policy() -> UploadPolicy {
    UploadPolicy {
        concurrency: 2,
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        attempt_timeout: Duration::from_secs(1),
    }
}

struct Fixture {
    sink: Arc<MemorySink>,
    ledger: Arc<FailureLedger>,
    scheduler: UploadScheduler,
    _temp_dir: TempDir,
}

fn fixture(policy: UploadPolicy) -> Result<Fixture> {
    let temp_dir = TempDir::new()?;
    let sink = Arc::new(MemorySink::new());
    let ledger = Arc::new(FailureLedger::open(temp_dir.path().join("ledger.json"))?);
    let scheduler = UploadScheduler::new(
        sink.clone(),
        Arc::new(MemoryStateStore::new()),
        Arc::clone(&ledger),
        policy,
    );
    Ok(Fixture {
        sink,
        ledger,
        scheduler,
        _temp_dir: temp_dir,
    })
}

fn chunk(session_id: &str, sequence: u64) -> Chunk {
    Chunk {
        session_id: session_id.to_string(),
        sequence,
        payload: vec![0u8; 128],
        recorded_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_all_admitted_sequences_remain_tracked() -> Result<()> {
    let fx = fixture(fast_policy())?;

    for sequence in 0..5 {
        fx.scheduler.enqueue(chunk("s1", sequence)).await;
    }
    fx.scheduler.wait_idle("s1").await;

    let sets = fx.scheduler.delivery_sets("s1");
    let union: std::collections::BTreeSet<u64> = sets
        .delivered
        .iter()
        .chain(sets.pending.iter())
        .chain(sets.failed.iter())
        .copied()
        .collect();

    assert_eq!(union, (0..5).collect(), "no admitted chunk may vanish untracked");
    assert_eq!(sets.delivered.len(), 5);
    assert!(sets.failed.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_transient_failures_retry_until_delivered() -> Result<()> {
    let fx = fixture(fast_policy())?;

    // Fails maxAttempts - 1 times, then succeeds: must end delivered
    fx.sink.fail_times(0, 2);
    fx.scheduler.enqueue(chunk("s1", 0)).await;
    fx.scheduler.wait_idle("s1").await;

    let sets = fx.scheduler.delivery_sets("s1");
    assert!(sets.delivered.contains(&0), "chunk must end delivered, not failed");
    assert!(sets.failed.is_empty());
    assert_eq!(fx.sink.attempt_count(0), 3, "two failures plus the success");
    assert!(fx.ledger.list().await.is_empty(), "no ledger entry for a recovered chunk");

    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_produce_one_ledger_record() -> Result<()> {
    let fx = fixture(fast_policy())?;

    // Chunk 2 fails on every attempt while 0,1,3,4 succeed
    fx.sink.fail_times(2, 10);
    for sequence in 0..5 {
        fx.scheduler.enqueue(chunk("s1", sequence)).await;
    }
    fx.scheduler.wait_idle("s1").await;

    let sets = fx.scheduler.delivery_sets("s1");
    assert_eq!(sets.delivered, [0, 1, 3, 4].into_iter().collect());
    assert_eq!(sets.failed, [2].into_iter().collect());
    assert!(sets.pending.is_empty());

    let records = fx.ledger.list().await;
    assert_eq!(records.len(), 1, "one record per session, not per chunk");
    assert_eq!(records[0].session_id, "s1");
    assert_eq!(records[0].failed_sequences, vec![2]);

    assert_eq!(fx.sink.attempt_count(2), 3, "maxAttempts attempts, no more");
    assert!(fx.scheduler.last_error().is_some());

    Ok(())
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() -> Result<()> {
    let fx = fixture(fast_policy())?;

    fx.sink.fail_permanently(0);
    fx.scheduler.enqueue(chunk("s1", 0)).await;
    fx.scheduler.wait_idle("s1").await;

    assert_eq!(fx.sink.attempt_count(0), 1, "permanent rejection gets exactly one attempt");

    let sets = fx.scheduler.delivery_sets("s1");
    assert_eq!(sets.failed, [0].into_iter().collect());

    let records = fx.ledger.list().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].reason.contains("permanent"));

    Ok(())
}

#[tokio::test]
async fn test_cancelled_session_abandons_pending_work() -> Result<()> {
    let mut policy = fast_policy();
    policy.concurrency = 1;
    let fx = fixture(policy)?;

    // Hold attempts long enough that most chunks are still queued
    fx.sink.set_delay(Duration::from_millis(100));
    for sequence in 0..4 {
        fx.scheduler.enqueue(chunk("s1", sequence)).await;
    }

    fx.scheduler.cancel_session("s1").await;
    fx.scheduler.wait_idle("s1").await;

    let counts = fx.scheduler.counts("s1");
    assert_eq!(counts.total(), 0, "cancelled session keeps no tracked chunks");
    assert!(
        fx.sink.delivered().len() <= 1,
        "at most the in-flight chunk may have finished"
    );

    Ok(())
}

#[tokio::test]
async fn test_enqueue_after_cancel_is_refused() -> Result<()> {
    let fx = fixture(fast_policy())?;

    fx.scheduler.enqueue(chunk("s1", 0)).await;
    fx.scheduler.cancel_session("s1").await;

    // A straggler chunk arriving after cancellation must not be
    // tracked, or wait_idle would block on work no worker will do.
    fx.scheduler.enqueue(chunk("s1", 1)).await;

    assert_eq!(fx.scheduler.counts("s1").total(), 0);
    tokio::time::timeout(Duration::from_secs(1), fx.scheduler.wait_idle("s1"))
        .await
        .expect("cancelled session with no tracked work is idle");

    Ok(())
}

#[tokio::test]
async fn test_retry_delivers_and_clears_ledger_record() -> Result<()> {
    let fx = fixture(fast_policy())?;

    // Exactly maxAttempts scripted failures: the chunk fails
    // terminally, then a later retry succeeds.
    fx.sink.fail_times(0, 3);
    fx.scheduler.enqueue(chunk("s1", 0)).await;
    fx.scheduler.wait_idle("s1").await;

    assert_eq!(fx.ledger.list().await.len(), 1);
    assert!(fx.ledger.has_retained("s1").await);

    let resubmitted = fx.ledger.retry("s1", &fx.scheduler).await?;
    assert_eq!(resubmitted, 1);
    fx.scheduler.wait_idle("s1").await;

    let sets = fx.scheduler.delivery_sets("s1");
    assert!(sets.delivered.contains(&0));
    assert!(sets.failed.is_empty());
    assert!(fx.ledger.list().await.is_empty(), "record removed after successful retry");
    assert!(!fx.ledger.has_retained("s1").await);

    Ok(())
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_transient_failure() -> Result<()> {
    let mut policy = fast_policy();
    policy.attempt_timeout = Duration::from_millis(20);
    let fx = fixture(policy)?;

    // Every attempt outlives the timeout, so all three attempts expire
    fx.sink.set_delay(Duration::from_millis(100));
    fx.scheduler.enqueue(chunk("s1", 0)).await;
    fx.scheduler.wait_idle("s1").await;

    let sets = fx.scheduler.delivery_sets("s1");
    assert_eq!(sets.failed, [0].into_iter().collect());

    let records = fx.ledger.list().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].reason.contains("timed out"));

    Ok(())
}
