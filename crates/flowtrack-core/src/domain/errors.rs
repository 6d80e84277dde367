//! Domain and engine error types

use thiserror::Error;

use super::newtypes::AgentVersion;

/// Validation errors for domain value construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid bucket identifier
    #[error("Invalid bucket id: {0}")]
    InvalidBucketId(String),

    /// Invalid agent version string
    #[error("Invalid agent version: {0}")]
    InvalidVersion(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Recoverable failure classes the sync engine handles per cycle
///
/// None of these escape the engine as unhandled faults. Only genuinely
/// unexpected conditions (storage medium unwritable, schema mismatch)
/// propagate upward through `anyhow` in the daemon.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local activity source is down or unreachable. The engine skips
    /// the affected bucket (or the whole cycle) and retries next cycle.
    /// No queue impact.
    #[error("Activity source unavailable: {0}")]
    SourceUnavailable(String),

    /// The remote service is unreachable or timed out. The batch is
    /// persisted to the queue and retried with backoff.
    #[error("Remote transport failure: {0}")]
    TransportFailure(String),

    /// The remote service explicitly refused the request. Queued and
    /// retried like a transport failure, but surfaced as a distinct
    /// status since retries are unlikely to succeed without operator
    /// action.
    #[error("Remote rejected request: {0}")]
    Rejected(String),

    /// The running agent is older than the remote's minimum supported
    /// version. Fatal to sending, not to the process: the engine blocks
    /// sends and keeps queuing locally.
    #[error("Agent version {running} below remote minimum {required}")]
    IncompatibleVersion {
        required: AgentVersion,
        running: AgentVersion,
    },

    /// The durable queue store failed its integrity check. The store is
    /// rebuilt empty and checkpoints reset; losing the queue is preferable
    /// to blocking the agent indefinitely.
    #[error("Queue store corrupt: {0}")]
    StorageCorrupt(String),
}

impl SyncError {
    /// Short stable label for status snapshots and structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::SourceUnavailable(_) => "source_unavailable",
            SyncError::TransportFailure(_) => "transport_failure",
            SyncError::Rejected(_) => "rejected",
            SyncError::IncompatibleVersion { .. } => "incompatible_version",
            SyncError::StorageCorrupt(_) => "storage_corrupt",
        }
    }
}
