//! Capture session management
//!
//! This module provides the `CaptureSession` state machine that manages:
//! - Chunk sequencing as source events arrive
//! - Non-blocking handoff to the upload scheduler
//! - RecoverySnapshot persistence on every transition
//! - Reconciliation of sessions interrupted by a restart
//! - Progress reporting for observers

mod config;
mod progress;
mod session;

pub use config::SessionConfig;
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use session::{CaptureSession, ResumeOutcome, SessionStatus};
