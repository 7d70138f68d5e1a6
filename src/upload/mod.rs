//! Chunk delivery: bounded-concurrency upload scheduling with
//! retry/backoff and precise per-chunk outcome tracking

mod memory;
mod retry;
mod scheduler;
mod sink;

pub use memory::MemorySink;
pub use retry::RetryPolicy;
pub use scheduler::{ActiveSessionContext, UploadPolicy, UploadScheduler};
pub use sink::{HttpUploadSink, UploadSink};
