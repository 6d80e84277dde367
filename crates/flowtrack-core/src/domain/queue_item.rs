//! Durable queue items
//!
//! One queue item is one sanitized event awaiting remote acceptance. Items
//! are created when a send fails (or partially fails), rescheduled with
//! backoff on each further failure, and destroyed either when the remote
//! confirms the event or when age-based expiry drops them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::event::SanitizedEvent;
use super::newtypes::QueueItemId;

/// A unit of durable pending work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store-assigned row id
    pub id: QueueItemId,
    /// The event awaiting delivery
    pub event: SanitizedEvent,
    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far; increases monotonically
    pub attempt_count: u32,
    /// Earliest instant the item is eligible for re-send
    pub next_retry_at: DateTime<Utc>,
}

impl QueueItem {
    /// Age of the item relative to `now`
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.enqueued_at
    }

    /// Whether the item has outlived the retention ceiling
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use crate::domain::newtypes::{BucketId, EventKey};

    use super::*;

    fn item(enqueued_at: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: QueueItemId::new(1),
            event: SanitizedEvent {
                key: EventKey::new(BucketId::new("b").unwrap(), "1"),
                timestamp: enqueued_at,
                duration: 5.0,
                payload: Map::new(),
                skew_adjusted: false,
            },
            enqueued_at,
            attempt_count: 0,
            next_retry_at: enqueued_at,
        }
    }

    #[test]
    fn test_age_and_expiry() {
        let now = Utc::now();
        let fresh = item(now - Duration::hours(1));
        let stale = item(now - Duration::days(31));

        let ceiling = Duration::days(30);
        assert!(!fresh.is_expired(now, ceiling));
        assert!(stale.is_expired(now, ceiling));
        assert_eq!(fresh.age(now), Duration::hours(1));
    }
}
