pub mod chunk;
pub mod config;
pub mod error;
pub mod ledger;
pub mod session;
pub mod source;
pub mod store;
pub mod upload;

pub use chunk::{Chunk, ChunkCounts, DeliverySets, DeliveryState};
pub use config::Config;
pub use error::{DeliveryError, PipelineError};
pub use ledger::{FailedUploadRecord, FailureLedger};
pub use session::{
    CaptureSession, ProgressReporter, ProgressSnapshot, ResumeOutcome, SessionConfig,
    SessionStatus,
};
pub use source::{ChunkSource, IntervalSource, SourceEvent};
pub use store::{FileStateStore, MemoryStateStore, RecoverySnapshot, SessionStateStore};
pub use upload::{
    ActiveSessionContext, HttpUploadSink, MemorySink, RetryPolicy, UploadPolicy, UploadScheduler,
    UploadSink,
};
