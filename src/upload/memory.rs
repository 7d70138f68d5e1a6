use super::UploadSink;
use crate::error::DeliveryError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory sink with scriptable failures.
///
/// Tests (and embedders that buffer uploads themselves) can make a
/// given sequence fail a fixed number of times before succeeding, or
/// fail permanently.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<(String, u64)>>,
    fail_plan: Mutex<HashMap<u64, FailPlan>>,
    attempts: Mutex<HashMap<u64, u32>>,
    delay: Mutex<Option<Duration>>,
}

struct FailPlan {
    remaining: u32,
    error: DeliveryError,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `sequence` fail transiently `times` times before succeeding
    pub fn fail_times(&self, sequence: u64, times: u32) {
        self.fail_plan.lock().unwrap().insert(
            sequence,
            FailPlan {
                remaining: times,
                error: DeliveryError::Transient("scripted network failure".to_string()),
            },
        );
    }

    /// Make `sequence` fail permanently on every attempt
    pub fn fail_permanently(&self, sequence: u64) {
        self.fail_plan.lock().unwrap().insert(
            sequence,
            FailPlan {
                remaining: u32::MAX,
                error: DeliveryError::Permanent("scripted rejection".to_string()),
            },
        );
    }

    /// Delay every attempt, to hold chunks in flight during a test
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Delivered (session, sequence) pairs in completion order
    pub fn delivered(&self) -> Vec<(String, u64)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Upload attempts observed for a sequence
    pub fn attempt_count(&self, sequence: u64) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&sequence)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl UploadSink for MemorySink {
    async fn put_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        _payload: &[u8],
    ) -> Result<(), DeliveryError> {
        *self.attempts.lock().unwrap().entry(sequence).or_insert(0) += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut plans = self.fail_plan.lock().unwrap();
            if let Some(plan) = plans.get_mut(&sequence) {
                if plan.remaining > 0 {
                    plan.remaining = plan.remaining.saturating_sub(1);
                    return Err(plan.error.clone());
                }
                plans.remove(&sequence);
            }
        }

        self.delivered
            .lock()
            .unwrap()
            .push((session_id.to_string(), sequence));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
