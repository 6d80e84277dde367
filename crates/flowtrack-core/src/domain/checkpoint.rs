//! Per-bucket sync checkpoints
//!
//! A checkpoint marks the newest event already reliably accepted by the
//! remote side for one bucket. It is owned exclusively by the sync engine:
//! read at cycle start, written only after the remote confirms the events
//! it covers, atomically with the removal of those events from the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::BucketId;

/// Durable cursor for one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The bucket this cursor belongs to
    pub bucket: BucketId,
    /// Timestamp of the newest confirmed event
    pub last_synced_at: DateTime<Utc>,
    /// Source event id of the newest confirmed event, when known
    pub last_event_id: Option<String>,
}

impl Checkpoint {
    /// Create a checkpoint
    #[must_use]
    pub fn new(
        bucket: BucketId,
        last_synced_at: DateTime<Utc>,
        last_event_id: Option<String>,
    ) -> Self {
        Self {
            bucket,
            last_synced_at,
            last_event_id,
        }
    }

    /// Advance to a newer confirmed position, keeping the invariant that
    /// checkpoints never move backwards. Returns true if the cursor moved.
    pub fn advance(&mut self, timestamp: DateTime<Utc>, event_id: Option<String>) -> bool {
        if timestamp > self.last_synced_at {
            self.last_synced_at = timestamp;
            self.last_event_id = event_id;
            true
        } else {
            false
        }
    }
}
