//! Sync engine
//!
//! The per-cycle state machine that moves events from the local source to
//! the remote service through the durable queue:
//!
//! ```text
//! Idle -> Fetching -> Transforming -> Sending -> Reconciling -> Idle
//! ```
//!
//! Any recoverable failure aborts the cycle back to Idle; the next
//! scheduled cycle proceeds normally. Version incompatibility enters a
//! Blocked state in which fetching and queuing continue but nothing is
//! sent until a heartbeat reports a satisfiable minimum version.
//!
//! Delivery rule: queue rows are removed and checkpoints advanced only for
//! keys the remote confirmed, atomically, via `commit_confirmed`. A crash
//! at any point replays at most one batch, and the dedup key makes the
//! replay a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use flowtrack_core::config::{Config, MAX_BATCH_SIZE};
use flowtrack_core::domain::{
    AgentVersion, BucketId, Checkpoint, ClockState, EventKey, QueueItem, SanitizedEvent,
    SyncError,
};
use flowtrack_core::ports::{
    BatchOutcome, IQueueStore, IRemoteSink, ISourceReader, SourceBucket,
};
use flowtrack_core::privacy::PrivacyFilter;

use crate::backoff::RetryPolicy;
use crate::status::{EnginePhase, StatusPublisher, StatusSnapshot};

/// Meta-table key for the last server time seen, read back on startup
const META_SERVER_TIME: &str = "last_server_time";

/// Wall-clock deviation between cycles treated as a clock jump
const CLOCK_JUMP_TOLERANCE: Duration = Duration::minutes(5);

/// Orchestrates fetch, transform, send, and reconcile over the ports
pub struct SyncEngine {
    source: Arc<dyn ISourceReader>,
    sink: Arc<dyn IRemoteSink>,
    store: Arc<dyn IQueueStore>,
    filter: PrivacyFilter,
    retry: RetryPolicy,
    config: Config,
    agent_version: AgentVersion,
    clock: Mutex<ClockState>,
    status: StatusPublisher,
    paused: AtomicBool,
    blocked: AtomicBool,
    last_cycle_start: Mutex<Option<DateTime<Utc>>>,
}

impl SyncEngine {
    /// Creates an engine over the given adapters.
    ///
    /// Restores the clock reference from the store's meta table; skew
    /// itself is re-measured on the first live round trip.
    pub async fn new(
        source: Arc<dyn ISourceReader>,
        sink: Arc<dyn IRemoteSink>,
        store: Arc<dyn IQueueStore>,
        config: Config,
        agent_version: AgentVersion,
    ) -> anyhow::Result<Self> {
        let persisted = store
            .get_meta(META_SERVER_TIME)
            .await?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // A previous process may have died mid-send.
        let released = store.release_in_flight().await?;
        if released > 0 {
            info!(released, "Recovered in-flight queue items from a previous run");
        }

        Ok(Self {
            filter: PrivacyFilter::new(config.privacy.clone()),
            retry: RetryPolicy::new(&config.retry),
            clock: Mutex::new(ClockState::from_persisted(persisted)),
            status: StatusPublisher::new(),
            paused: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            last_cycle_start: Mutex::new(None),
            source,
            sink,
            store,
            config,
            agent_version,
        })
    }

    // ========================================================================
    // Controls and observability
    // ========================================================================

    /// Subscribes to status snapshots
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.current()
    }

    /// Suspends live scheduling. Queue state is untouched.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.status.update(|s| s.paused = true);
        info!("Sync paused");
    }

    /// Resumes live scheduling
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.status.update(|s| s.paused = false);
        info!("Sync resumed");
    }

    /// Whether live scheduling is suspended
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether sending is version-gated
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Live cycle
    // ========================================================================

    /// Runs one live sync cycle: fetch, transform, enqueue, send one
    /// batch, reconcile. Recoverable failures are absorbed and recorded;
    /// only storage-level faults escape as errors.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        if self.is_paused() {
            debug!("Cycle skipped: paused");
            // A long pause must not read as a clock jump on resume.
            *self
                .last_cycle_start
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = None;
            return Ok(());
        }

        let now = Utc::now();
        self.detect_clock_jump(now);

        self.set_phase(EnginePhase::Fetching);

        if !self.source.is_available().await {
            debug!("Cycle skipped: activity source not reachable");
            self.set_phase(self.idle_phase());
            return Ok(());
        }

        let buckets = match self.source.list_buckets().await {
            Ok(buckets) => buckets,
            Err(e) => {
                self.record_error(&e);
                self.set_phase(self.idle_phase());
                return Ok(());
            }
        };

        for bucket in buckets {
            if let Err(e) = self.ingest_bucket(&bucket, now).await {
                // Storage faults are fatal; reader faults were already
                // absorbed inside ingest_bucket.
                return Err(e);
            }
        }

        if self.is_blocked() {
            // Queuing continues while blocked; probe for the gate lifting.
            self.probe_compatibility().await;
        } else {
            self.set_phase(EnginePhase::Sending);
            self.send_ready_batches(1).await?;
        }

        self.reconcile(now).await?;
        Ok(())
    }

    /// Fetches, sanitizes, and enqueues new events for one bucket.
    ///
    /// Reader failures skip the bucket for this cycle. Returns an error
    /// only for storage faults.
    async fn ingest_bucket(&self, bucket: &SourceBucket, now: DateTime<Utc>) -> anyhow::Result<()> {
        let corrected_now = self.corrected_now(now);

        let since = match self.store.get_checkpoint(&bucket.id).await? {
            Some(cp) => cp.last_synced_at,
            None => {
                // First sight of this bucket: anchor a backfill window so
                // restarts don't re-backfill from scratch.
                let anchor =
                    corrected_now - Duration::hours(i64::from(self.config.sync.backfill_hours));
                self.store
                    .set_checkpoint(&Checkpoint::new(bucket.id.clone(), anchor, None))
                    .await?;
                info!(
                    bucket = %bucket.id,
                    backfill_hours = self.config.sync.backfill_hours,
                    "New bucket, anchoring backfill window"
                );
                anchor
            }
        };

        let raw = match self
            .source
            .fetch_since(&bucket.id, since, MAX_BATCH_SIZE)
            .await
        {
            Ok(raw) => raw,
            Err(e @ SyncError::SourceUnavailable(_)) => {
                debug!(bucket = %bucket.id, error = %e, "Skipping bucket this cycle");
                return Ok(());
            }
            Err(e) => {
                self.record_error(&e);
                return Ok(());
            }
        };

        if raw.is_empty() {
            return Ok(());
        }

        self.set_phase(EnginePhase::Transforming);

        let mut seen: HashSet<EventKey> = HashSet::new();
        let mut sanitized: Vec<SanitizedEvent> = Vec::new();
        for event in &raw {
            let key = event.key(&bucket.id);
            if event.timestamp <= since || !seen.insert(key) {
                continue;
            }
            let Some(mut clean) = self.filter.transform(&bucket.id, bucket.kind, event) else {
                continue;
            };
            if clean.timestamp > corrected_now {
                debug!(
                    bucket = %bucket.id,
                    event_id = event.id,
                    "Clamping future-dated event timestamp"
                );
                clean.timestamp = corrected_now;
                clean.skew_adjusted = true;
            }
            sanitized.push(clean);
        }

        if sanitized.is_empty() {
            return Ok(());
        }

        // Keys already queued from a previous run are expected after a
        // crash mid-batch; drop them silently.
        let keys: Vec<EventKey> = sanitized.iter().map(|e| e.key.clone()).collect();
        let already_queued: HashSet<EventKey> =
            self.store.contains_keys(&keys).await?.into_iter().collect();
        sanitized.retain(|e| !already_queued.contains(&e.key));

        let inserted = self.store.enqueue(&sanitized, now, now).await?;
        debug!(
            bucket = %bucket.id,
            fetched = raw.len(),
            enqueued = inserted,
            "Bucket ingested"
        );
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Dequeues and sends up to `max_batches` ready batches, committing
    /// confirmations and rescheduling failures.
    async fn send_ready_batches(&self, max_batches: u32) -> anyhow::Result<()> {
        for _ in 0..max_batches {
            if self.is_blocked() {
                break;
            }
            let now = Utc::now();
            let items = self
                .store
                .dequeue_ready(now, self.config.sync.batch_size)
                .await?;
            if items.is_empty() {
                break;
            }

            let events: Vec<SanitizedEvent> = items.iter().map(|i| i.event.clone()).collect();
            let response = self.sink.send_batch(&events).await?;
            self.absorb_server_meta(response.server_time, response.minimum_agent_version)
                .await;

            match response.outcome {
                BatchOutcome::AllAccepted { confirmed } => {
                    self.commit(&items, &confirmed).await?;
                }
                BatchOutcome::PartiallyAccepted { confirmed, rejected } => {
                    for (key, reason) in &rejected {
                        warn!(key = %key, reason, "Event refused by remote, will retry");
                    }
                    self.commit(&items, &confirmed).await?;
                }
                BatchOutcome::Rejected { reason } => {
                    self.record_error(&SyncError::Rejected(reason));
                    self.reschedule_all(&items).await?;
                    break;
                }
                BatchOutcome::TransportFailure { reason } => {
                    self.record_error(&SyncError::TransportFailure(reason));
                    self.reschedule_all(&items).await?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Removes confirmed rows and advances checkpoints atomically;
    /// reschedules everything in the batch that was not confirmed.
    async fn commit(&self, items: &[QueueItem], confirmed: &[EventKey]) -> anyhow::Result<()> {
        let by_key: HashMap<&EventKey, &QueueItem> =
            items.iter().map(|i| (&i.event.key, i)).collect();

        // Max confirmed timestamp per bucket becomes the new checkpoint.
        // Clamped (skew-adjusted) events carry a corrected timestamp, so
        // they cannot drag a checkpoint past legitimate unsynced events.
        let mut advances: HashMap<BucketId, (DateTime<Utc>, Option<String>)> = HashMap::new();
        let mut known_confirmed: Vec<EventKey> = Vec::with_capacity(confirmed.len());
        for key in confirmed {
            let Some(item) = by_key.get(key) else {
                warn!(key = %key, "Remote confirmed a key outside the batch, ignoring");
                continue;
            };
            let ts = item.event.timestamp;
            let entry = advances
                .entry(key.bucket.clone())
                .or_insert((ts, Some(key.event_id.clone())));
            if ts > entry.0 {
                *entry = (ts, Some(key.event_id.clone()));
            }
            known_confirmed.push(key.clone());
        }

        let checkpoints: Vec<Checkpoint> = advances
            .into_iter()
            .map(|(bucket, (ts, event_id))| Checkpoint::new(bucket, ts, event_id))
            .collect();

        self.store
            .commit_confirmed(&known_confirmed, &checkpoints)
            .await?;

        let confirmed_set: HashSet<&EventKey> = known_confirmed.iter().collect();
        let unconfirmed: Vec<&QueueItem> = items
            .iter()
            .filter(|i| !confirmed_set.contains(&i.event.key))
            .collect();
        if !unconfirmed.is_empty() {
            self.reschedule(&unconfirmed).await?;
        }

        info!(
            confirmed = known_confirmed.len(),
            pending = unconfirmed.len(),
            "Batch reconciled"
        );
        Ok(())
    }

    async fn reschedule_all(&self, items: &[QueueItem]) -> anyhow::Result<()> {
        let refs: Vec<&QueueItem> = items.iter().collect();
        self.reschedule(&refs).await
    }

    async fn reschedule(&self, items: &[&QueueItem]) -> anyhow::Result<()> {
        let now = Utc::now();
        let updates: Vec<_> = items
            .iter()
            .map(|i| (i.id, self.retry.next_retry_at(i.attempt_count, now)))
            .collect();

        for item in items {
            if item.attempt_count + 1 >= self.config.queue.max_attempts {
                warn!(
                    key = %item.event.key,
                    attempts = item.attempt_count + 1,
                    "Queue item persistently failing; kept until age expiry"
                );
            }
        }

        self.store.reschedule(&updates).await
    }

    // ========================================================================
    // Retry drain and flush
    // ========================================================================

    /// Runs one retry-drain pass over the offline queue, bounded by the
    /// configured batches-per-pass.
    pub async fn run_drain(&self) -> anyhow::Result<()> {
        if self.is_paused() {
            return Ok(());
        }
        if self.is_blocked() {
            self.probe_compatibility().await;
            return Ok(());
        }
        self.set_phase(EnginePhase::Sending);
        self.send_ready_batches(self.config.sync.max_batches_per_drain)
            .await?;
        self.reconcile(Utc::now()).await
    }

    /// Best-effort final drain before shutdown or sign-out. Errors are
    /// logged, never propagated; whatever remains queued survives in the
    /// store for the next run.
    pub async fn flush(&self) {
        info!("Final flush requested");
        if self.is_blocked() {
            return;
        }
        if let Err(e) = self
            .send_ready_batches(self.config.sync.max_batches_per_drain)
            .await
        {
            warn!(error = %e, "Final flush incomplete");
        }
    }

    // ========================================================================
    // Reconciliation and shared state
    // ========================================================================

    async fn reconcile(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.set_phase(EnginePhase::Reconciling);

        let max_age = Duration::days(i64::from(self.config.queue.retention_days));
        let expired = self.store.compact_expired(max_age, now).await?;
        if expired > 0 {
            warn!(expired, "Dropped expired queue items during reconciliation");
        }

        let depth = self.store.depth().await?;
        self.status.update(|s| {
            s.queue_depth = depth;
            s.last_sync_at = Some(now);
        });
        self.set_phase(self.idle_phase());
        Ok(())
    }

    /// Updates clock state and the version gate from a server response
    async fn absorb_server_meta(
        &self,
        server_time: Option<DateTime<Utc>>,
        minimum_agent_version: Option<AgentVersion>,
    ) {
        if let Some(server_time) = server_time {
            let local_now = Utc::now();
            let (crossed, excessive, skew_ms) = {
                let mut clock = self.clock.lock().unwrap_or_else(|e| e.into_inner());
                let crossed = clock.observe(server_time, local_now);
                (crossed, clock.skew_excessive(), clock.observed_skew_ms)
            };
            if crossed {
                warn!(
                    skew_ms,
                    "Local clock skew exceeds five minutes; timestamps are corrected, sync continues"
                );
            }
            self.status.update(|s| s.skew_excessive = excessive);
            if let Err(e) = self
                .store
                .set_meta(META_SERVER_TIME, &server_time.to_rfc3339())
                .await
            {
                warn!(error = %e, "Failed to persist server time");
            }
        }

        if let Some(required) = minimum_agent_version {
            if required > self.agent_version {
                if !self.blocked.swap(true, Ordering::SeqCst) {
                    let err = SyncError::IncompatibleVersion {
                        required,
                        running: self.agent_version,
                    };
                    error!(error = %err, "Sending blocked until the agent is upgraded");
                    self.record_error(&err);
                    self.set_phase(EnginePhase::Blocked);
                }
            } else if self.blocked.swap(false, Ordering::SeqCst) {
                info!(
                    minimum = %required,
                    running = %self.agent_version,
                    "Version gate cleared, sending resumes"
                );
                self.status.update(|s| s.last_error = None);
            }
        }
    }

    /// Heartbeats the remote while blocked, looking for the gate to lift
    async fn probe_compatibility(&self) {
        match self.sink.heartbeat().await {
            Ok(ack) => {
                self.absorb_server_meta(ack.server_time, ack.minimum_agent_version)
                    .await;
            }
            Err(e) => debug!(error = %e, "Heartbeat failed while blocked"),
        }
    }

    fn detect_clock_jump(&self, now: DateTime<Utc>) {
        let mut last = self.last_cycle_start.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = *last {
            let expected = Duration::seconds(self.config.sync.interval_seconds as i64);
            let delta = now - previous;
            if cycle_gap_is_jump(delta, expected) {
                warn!(
                    delta_secs = delta.num_seconds(),
                    expected_secs = expected.num_seconds(),
                    "Wall-clock jump between cycles; hourly aggregates upstream are suspect"
                );
                self.status.update(|s| s.clock_jump_detected = true);
            }
        }
        *last = Some(now);
    }

    fn corrected_now(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        self.clock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .corrected_now(local_now)
    }

    fn record_error(&self, err: &SyncError) {
        warn!(kind = err.kind(), error = %err, "Sync cycle error");
        let label = format!("{}: {err}", err.kind());
        self.status.update(|s| s.last_error = Some(label));
    }

    fn set_phase(&self, phase: EnginePhase) {
        self.status.update(|s| s.phase = phase);
    }

    fn idle_phase(&self) -> EnginePhase {
        if self.is_blocked() {
            EnginePhase::Blocked
        } else {
            EnginePhase::Idle
        }
    }
}

/// Whether the observed gap between cycle starts deviates from the
/// scheduled interval by more than the tolerance
fn cycle_gap_is_jump(delta: Duration, expected: Duration) -> bool {
    (delta - expected).abs() > CLOCK_JUMP_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinary_cycle_gap_is_not_a_jump() {
        let expected = Duration::seconds(60);
        assert!(!cycle_gap_is_jump(Duration::seconds(60), expected));
        assert!(!cycle_gap_is_jump(Duration::seconds(95), expected));
        assert!(!cycle_gap_is_jump(Duration::seconds(0), expected));
    }

    #[test]
    fn test_large_gap_in_either_direction_is_a_jump() {
        let expected = Duration::seconds(60);
        assert!(cycle_gap_is_jump(Duration::minutes(45), expected));
        assert!(cycle_gap_is_jump(Duration::minutes(-30), expected));
    }
}
