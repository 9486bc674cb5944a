//! Error kinds for the harness.
//!
//! Per-sample errors fail the whole run: masking them would bias the
//! measurements. Only the bounded-receive timeout is non-fatal (zero
//! samples) and window-level anomalies are tolerated by the aggregator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerfError {
    /// Rejected configuration; reported before the experiment starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unknown message type name; fails fast at construction time.
    #[error("unsupported message type: {0}")]
    UnsupportedMessage(String),

    /// QoS vector the transport cannot honor; fails fast at construction.
    #[error("unsupported QoS: {0}")]
    UnsupportedQos(String),

    /// Publish or receive failed; fatal for the run.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Monotonic-sequence or sent-before-received violation.
    #[error("data consistency violated: {0}")]
    FatalInvariant(String),

    #[error("event database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PerfError {
    /// Process exit code: 2 for pre-start rejections, 1 for runtime faults.
    pub fn exit_code(&self) -> i32 {
        match self {
            PerfError::Config(_)
            | PerfError::UnsupportedMessage(_)
            | PerfError::UnsupportedQos(_) => 2,
            _ => 1,
        }
    }
}
