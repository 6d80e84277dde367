//! Durable queue store port (driven/secondary port)
//!
//! Interface for crash-safe persistence of pending outbound events and
//! per-bucket sync checkpoints.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, filesystem) and don't need domain-level classification.
//! - Implementations must provide one logical writer at a time: the live
//!   cycle and the retry-drain pass may both call in, but mutating methods
//!   serialize internally. Readers may run against a best-effort snapshot.
//! - `commit_confirmed` is the only way checkpoints advance after events
//!   are delivered: removal of the confirmed rows and the checkpoint
//!   upserts happen in one transaction, both succeed or both fail.
//! - `dequeue_ready` marks the returned rows in flight; expiry never
//!   touches in-flight rows, avoiding a double-remove race with an
//!   outstanding send. `release_in_flight` clears stale markers after a
//!   crash.

use chrono::{DateTime, Duration, Utc};

use crate::domain::checkpoint::Checkpoint;
use crate::domain::event::SanitizedEvent;
use crate::domain::newtypes::{BucketId, EventKey, QueueItemId};
use crate::domain::queue_item::QueueItem;

/// Result of a startup integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// The store passed its consistency checks
    Ok,
    /// The store is damaged and must be rebuilt empty
    Corrupt(String),
}

/// Port trait for the durable queue and checkpoint store
#[async_trait::async_trait]
pub trait IQueueStore: Send + Sync {
    /// Persists events for later delivery. Keys already present are
    /// ignored (dedup no-op). Returns the number of rows actually
    /// inserted.
    async fn enqueue(
        &self,
        events: &[SanitizedEvent],
        now: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> anyhow::Result<usize>;

    /// Returns up to `limit` items whose `next_retry_at <= now`, oldest
    /// first, marking them in flight in the same transaction.
    async fn dequeue_ready(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<QueueItem>>;

    /// Deletes queue rows by id (delivery confirmed through another path,
    /// or operator-driven cleanup).
    async fn remove(&self, ids: &[QueueItemId]) -> anyhow::Result<usize>;

    /// Records a failed delivery attempt for each id: increments the
    /// attempt count, sets the per-item retry time, clears the in-flight
    /// marker.
    async fn reschedule(&self, updates: &[(QueueItemId, DateTime<Utc>)]) -> anyhow::Result<()>;

    /// Atomically deletes the rows for `confirmed` keys and upserts the
    /// advanced `checkpoints`. Both succeed or both fail.
    async fn commit_confirmed(
        &self,
        confirmed: &[EventKey],
        checkpoints: &[Checkpoint],
    ) -> anyhow::Result<()>;

    /// Which of the given keys are already queued (dedup support).
    async fn contains_keys(&self, keys: &[EventKey]) -> anyhow::Result<Vec<EventKey>>;

    /// Reads the checkpoint for one bucket.
    async fn get_checkpoint(&self, bucket: &BucketId) -> anyhow::Result<Option<Checkpoint>>;

    /// Writes a checkpoint outside the confirmation path (initial
    /// backfill anchor).
    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    /// All known checkpoints.
    async fn all_checkpoints(&self) -> anyhow::Result<Vec<Checkpoint>>;

    /// Consistency check, run before any other access on startup.
    async fn integrity_check(&self) -> anyhow::Result<IntegrityStatus>;

    /// Drops rows older than `max_age`, skipping in-flight rows. The
    /// returned count is logged by the caller: this data loss is
    /// deliberate, never silent.
    async fn compact_expired(&self, max_age: Duration, now: DateTime<Utc>)
        -> anyhow::Result<usize>;

    /// Clears stale in-flight markers left by a crashed process.
    async fn release_in_flight(&self) -> anyhow::Result<usize>;

    /// Current number of queued events.
    async fn depth(&self) -> anyhow::Result<u64>;

    /// Reads a value from the meta table (persisted server time).
    async fn get_meta(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Writes a value to the meta table.
    async fn set_meta(&self, key: &str, value: &str) -> anyhow::Result<()>;
}
