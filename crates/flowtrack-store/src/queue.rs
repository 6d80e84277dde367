//! SQLite implementation of IQueueStore
//!
//! Concrete store for the durable event queue and per-bucket checkpoints.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                                    |
//! |------------------|----------|---------------------------------------------|
//! | SanitizedEvent   | TEXT     | serde_json serialization in `payload`       |
//! | BucketId         | TEXT     | plain string                                |
//! | EventKey         | 2×TEXT   | `(bucket_id, event_id)` columns, unique idx |
//! | DateTime<Utc>    | TEXT     | ISO 8601 via `to_rfc3339()`                 |
//! | QueueItemId      | INTEGER  | SQLite rowid                                |
//!
//! ## Writer discipline
//!
//! The live sync cycle and the retry-drain pass can both reach this store.
//! Every mutating method serializes on an internal async mutex so there is
//! exactly one logical writer at a time; read-only methods go straight to
//! the pool and see a best-effort snapshot.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use flowtrack_core::domain::{BucketId, Checkpoint, EventKey, QueueItem, QueueItemId, SanitizedEvent};
use flowtrack_core::ports::{IQueueStore, IntegrityStatus};

use crate::StoreError;

/// SQLite-backed durable queue and checkpoint store
pub struct SqliteQueueStore {
    pool: SqlitePool,
    /// Hard ceiling on queued rows; oldest rows are evicted beyond it
    max_queue_size: u32,
    /// Single-writer gate shared by all mutating methods
    write_gate: Mutex<()>,
}

impl SqliteQueueStore {
    /// Creates a new store instance over the given connection pool
    pub fn new(pool: SqlitePool, max_queue_size: u32) -> Self {
        Self {
            pool,
            max_queue_size,
            write_gate: Mutex::new(()),
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Reconstruct a QueueItem from a database row
fn queue_item_from_row(row: &SqliteRow) -> Result<QueueItem, StoreError> {
    let id: i64 = row.get("id");
    let payload: String = row.get("payload");
    let enqueued_at: String = row.get("enqueued_at");
    let attempt_count: i64 = row.get("attempt_count");
    let next_retry_at: String = row.get("next_retry_at");

    let event: SanitizedEvent = serde_json::from_str(&payload).map_err(|e| {
        StoreError::SerializationError(format!("Invalid event payload in row {}: {}", id, e))
    })?;

    Ok(QueueItem {
        id: QueueItemId::new(id),
        event,
        enqueued_at: parse_datetime(&enqueued_at)?,
        attempt_count: attempt_count as u32,
        next_retry_at: parse_datetime(&next_retry_at)?,
    })
}

/// Reconstruct a Checkpoint from a database row
fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, StoreError> {
    let bucket_id: String = row.get("bucket_id");
    let last_synced_at: String = row.get("last_synced_at");
    let last_event_id: Option<String> = row.get("last_event_id");

    let bucket = BucketId::new(bucket_id)
        .map_err(|e| StoreError::SerializationError(format!("Invalid bucket id in row: {e}")))?;

    Ok(Checkpoint::new(
        bucket,
        parse_datetime(&last_synced_at)?,
        last_event_id,
    ))
}

// ============================================================================
// IQueueStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IQueueStore for SqliteQueueStore {
    async fn enqueue(
        &self,
        events: &[SanitizedEvent],
        now: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let _gate = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for event in events {
            let payload = serde_json::to_string(event)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO queued_events \
                 (bucket_id, event_id, payload, enqueued_at, attempt_count, next_retry_at, in_flight) \
                 VALUES (?, ?, ?, ?, 0, ?, 0)",
            )
            .bind(event.key.bucket.as_str())
            .bind(&event.key.event_id)
            .bind(&payload)
            .bind(now.to_rfc3339())
            .bind(next_retry_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        // Enforce the queue ceiling: evict oldest non-in-flight rows.
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_events")
            .fetch_one(&mut *tx)
            .await?;
        let overflow = total - i64::from(self.max_queue_size);
        if overflow > 0 {
            let evicted = sqlx::query(
                "DELETE FROM queued_events WHERE id IN ( \
                   SELECT id FROM queued_events WHERE in_flight = 0 \
                   ORDER BY enqueued_at ASC, id ASC LIMIT ?)",
            )
            .bind(overflow)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            warn!(
                evicted,
                ceiling = self.max_queue_size,
                "Queue full, evicted oldest events"
            );
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn dequeue_ready(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<QueueItem>> {
        let _gate = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT id, payload, enqueued_at, attempt_count, next_retry_at \
             FROM queued_events \
             WHERE next_retry_at <= ? AND in_flight = 0 \
             ORDER BY enqueued_at ASC, id ASC \
             LIMIT ?",
        )
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(queue_item_from_row(row)?);
        }

        // Mark dequeued rows in flight inside the same transaction so a
        // concurrent compaction or dequeue never sees them as available.
        for item in &items {
            sqlx::query("UPDATE queued_events SET in_flight = 1 WHERE id = ?")
                .bind(item.id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(items)
    }

    async fn remove(&self, ids: &[QueueItemId]) -> anyhow::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _gate = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        let mut removed = 0usize;
        for id in ids {
            removed += sqlx::query("DELETE FROM queued_events WHERE id = ?")
                .bind(id.as_i64())
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn reschedule(&self, updates: &[(QueueItemId, DateTime<Utc>)]) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let _gate = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        for (id, next_retry_at) in updates {
            sqlx::query(
                "UPDATE queued_events \
                 SET attempt_count = attempt_count + 1, next_retry_at = ?, in_flight = 0 \
                 WHERE id = ?",
            )
            .bind(next_retry_at.to_rfc3339())
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn commit_confirmed(
        &self,
        confirmed: &[EventKey],
        checkpoints: &[Checkpoint],
    ) -> anyhow::Result<()> {
        if confirmed.is_empty() && checkpoints.is_empty() {
            return Ok(());
        }
        let _gate = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;

        for key in confirmed {
            sqlx::query("DELETE FROM queued_events WHERE bucket_id = ? AND event_id = ?")
                .bind(key.bucket.as_str())
                .bind(&key.event_id)
                .execute(&mut *tx)
                .await?;
        }

        // Checkpoints never move backwards, even if a late confirmation
        // arrives out of order.
        for cp in checkpoints {
            sqlx::query(
                "INSERT INTO sync_checkpoints (bucket_id, last_synced_at, last_event_id, updated_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(bucket_id) DO UPDATE SET \
                   last_synced_at = excluded.last_synced_at, \
                   last_event_id = excluded.last_event_id, \
                   updated_at = excluded.updated_at \
                 WHERE excluded.last_synced_at > sync_checkpoints.last_synced_at",
            )
            .bind(cp.bucket.as_str())
            .bind(cp.last_synced_at.to_rfc3339())
            .bind(cp.last_event_id.as_deref())
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            confirmed = confirmed.len(),
            checkpoints = checkpoints.len(),
            "Committed confirmed events and advanced checkpoints"
        );
        Ok(())
    }

    async fn contains_keys(&self, keys: &[EventKey]) -> anyhow::Result<Vec<EventKey>> {
        let mut present = Vec::new();
        for key in keys {
            let row: Option<i64> = sqlx::query_scalar(
                "SELECT 1 FROM queued_events WHERE bucket_id = ? AND event_id = ?",
            )
            .bind(key.bucket.as_str())
            .bind(&key.event_id)
            .fetch_optional(&self.pool)
            .await?;
            if row.is_some() {
                present.push(key.clone());
            }
        }
        Ok(present)
    }

    async fn get_checkpoint(&self, bucket: &BucketId) -> anyhow::Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT bucket_id, last_synced_at, last_event_id \
             FROM sync_checkpoints WHERE bucket_id = ?",
        )
        .bind(bucket.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(checkpoint_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let _gate = self.write_gate.lock().await;

        sqlx::query(
            "INSERT INTO sync_checkpoints (bucket_id, last_synced_at, last_event_id, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(bucket_id) DO UPDATE SET \
               last_synced_at = excluded.last_synced_at, \
               last_event_id = excluded.last_event_id, \
               updated_at = excluded.updated_at",
        )
        .bind(checkpoint.bucket.as_str())
        .bind(checkpoint.last_synced_at.to_rfc3339())
        .bind(checkpoint.last_event_id.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_checkpoints(&self) -> anyhow::Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT bucket_id, last_synced_at, last_event_id FROM sync_checkpoints",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut checkpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            checkpoints.push(checkpoint_from_row(row)?);
        }
        Ok(checkpoints)
    }

    async fn integrity_check(&self) -> anyhow::Result<IntegrityStatus> {
        // quick_check validates page structure without a full index scan.
        let verdicts: Result<Vec<String>, sqlx::Error> =
            sqlx::query_scalar("PRAGMA quick_check").fetch_all(&self.pool).await;

        let verdicts = match verdicts {
            Ok(v) => v,
            Err(e) => return Ok(IntegrityStatus::Corrupt(e.to_string())),
        };

        if verdicts.len() != 1 || verdicts[0] != "ok" {
            return Ok(IntegrityStatus::Corrupt(verdicts.join("; ")));
        }

        // The schema itself must be present and readable.
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name IN ('queued_events', 'sync_checkpoints', 'sync_meta')",
        )
        .fetch_all(&self.pool)
        .await?;
        if tables.len() != 3 {
            return Ok(IntegrityStatus::Corrupt(format!(
                "expected 3 core tables, found {}",
                tables.len()
            )));
        }

        Ok(IntegrityStatus::Ok)
    }

    async fn compact_expired(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let _gate = self.write_gate.lock().await;

        let cutoff = now - max_age;
        let removed = sqlx::query(
            "DELETE FROM queued_events WHERE enqueued_at < ? AND in_flight = 0",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        if removed > 0 {
            warn!(
                removed,
                max_age_days = max_age.num_days(),
                "Expired undelivered events dropped from the queue"
            );
        }
        Ok(removed)
    }

    async fn release_in_flight(&self) -> anyhow::Result<usize> {
        let _gate = self.write_gate.lock().await;

        let released = sqlx::query("UPDATE queued_events SET in_flight = 0 WHERE in_flight = 1")
            .execute(&self.pool)
            .await?
            .rows_affected() as usize;

        if released > 0 {
            debug!(released, "Released stale in-flight markers");
        }
        Ok(released)
    }

    async fn depth(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn get_meta(&self, key: &str) -> anyhow::Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _gate = self.write_gate.lock().await;

        sqlx::query("INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
