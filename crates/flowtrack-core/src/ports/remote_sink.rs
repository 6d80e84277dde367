//! Remote sender port (driven/secondary port)
//!
//! Interface to the remote time-tracking ingestion API. The adapter maps
//! every wire-level condition, including network failures, into a
//! [`BatchOutcome`], so the engine can reason about delivery with one
//! exhaustive match instead of juggling error types. Only genuinely
//! unexpected conditions escape as `anyhow` errors.

use chrono::{DateTime, Utc};

use crate::domain::event::SanitizedEvent;
use crate::domain::newtypes::{AgentVersion, EventKey};

/// Per-batch delivery outcome
///
/// The engine must only clear queue rows and advance checkpoints for keys
/// listed as confirmed; anything not confirmed remains pending.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every submitted event is durable on the remote side
    AllAccepted {
        confirmed: Vec<EventKey>,
    },
    /// Some events were accepted, some refused (normal path, not an error)
    PartiallyAccepted {
        confirmed: Vec<EventKey>,
        rejected: Vec<(EventKey, String)>,
    },
    /// The remote explicitly refused the whole request (auth failure,
    /// malformed batch). Retries are unlikely to succeed without operator
    /// action, so this is surfaced distinctly from transport failures.
    Rejected {
        reason: String,
    },
    /// The remote was unreachable or the request timed out
    TransportFailure {
        reason: String,
    },
}

impl BatchOutcome {
    /// Keys confirmed durable by this outcome
    #[must_use]
    pub fn confirmed(&self) -> &[EventKey] {
        match self {
            BatchOutcome::AllAccepted { confirmed }
            | BatchOutcome::PartiallyAccepted { confirmed, .. } => confirmed,
            _ => &[],
        }
    }
}

/// Full response from a remote round trip
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    /// Delivery outcome
    pub outcome: BatchOutcome,
    /// Server-reported time, used for clock-skew correction
    pub server_time: Option<DateTime<Utc>>,
    /// Minimum agent version the server still accepts; running below it
    /// transitions the engine to its blocked state
    pub minimum_agent_version: Option<AgentVersion>,
}

/// Result of a heartbeat round trip
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatAck {
    /// Whether the server answered at all
    pub reachable: bool,
    /// Server-reported time
    pub server_time: Option<DateTime<Utc>>,
    /// Minimum agent version the server still accepts
    pub minimum_agent_version: Option<AgentVersion>,
}

/// Port trait for sending sanitized events to the remote service
#[async_trait::async_trait]
pub trait IRemoteSink: Send + Sync {
    /// Submits a batch for ingestion. Transport failures and explicit
    /// rejections are reported through the outcome, not as `Err`.
    async fn send_batch(&self, events: &[SanitizedEvent]) -> anyhow::Result<BatchResponse>;

    /// Lightweight liveness/compatibility probe.
    async fn heartbeat(&self) -> anyhow::Result<HeartbeatAck>;
}
