//! Observable engine status
//!
//! The engine publishes a [`StatusSnapshot`] through a `tokio::sync::watch`
//! channel after every phase change. Readers (daemon logs, future IPC
//! surfaces) never hold an engine lock; they just clone the latest value.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Phase of the engine's cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Waiting for the next scheduled cycle
    Idle,
    /// Reading buckets and events from the local source
    Fetching,
    /// Applying privacy rules and dedup
    Transforming,
    /// Submitting batches to the remote
    Sending,
    /// Committing confirmations and compacting the queue
    Reconciling,
    /// Version-gated: queuing continues, sending is suspended
    Blocked,
}

/// Point-in-time view of engine state
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// Current phase
    pub phase: EnginePhase,
    /// Queued events awaiting confirmation
    pub queue_depth: u64,
    /// Completion instant of the last cycle that reached reconciliation
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Stable label and message of the most recent cycle error
    pub last_error: Option<String>,
    /// Local clock drifts more than the warning threshold from the server
    pub skew_excessive: bool,
    /// A wall-clock jump was detected between cycles; aggregation caches
    /// upstream should be treated as suspect
    pub clock_jump_detected: bool,
    /// Live scheduling is suspended by the operator
    pub paused: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Idle,
            queue_depth: 0,
            last_sync_at: None,
            last_error: None,
            skew_excessive: false,
            clock_jump_detected: false,
            paused: false,
        }
    }
}

/// Write side of the status channel, owned by the engine
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusPublisher {
    /// Creates a publisher seeded with the default snapshot
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    /// Subscribes a new reader to status updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Applies a mutation to the current snapshot and notifies readers
    pub fn update(&self, mutate: impl FnOnce(&mut StatusSnapshot)) {
        self.tx.send_modify(mutate);
    }

    /// Current snapshot
    #[must_use]
    pub fn current(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_visible_to_subscribers() {
        let publisher = StatusPublisher::new();
        let rx = publisher.subscribe();

        publisher.update(|s| {
            s.phase = EnginePhase::Fetching;
            s.queue_depth = 12;
        });

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.phase, EnginePhase::Fetching);
        assert_eq!(snapshot.queue_depth, 12);
    }

    #[test]
    fn test_current_reflects_latest() {
        let publisher = StatusPublisher::new();
        publisher.update(|s| s.paused = true);
        assert!(publisher.current().paused);
    }
}
