//! Clock skew tracking
//!
//! The source reports event timestamps from the local wall clock; the
//! remote reports its own time on every successful round trip. [`ClockState`]
//! tracks the observed drift so the engine can clamp future-dated events and
//! warn when the local clock wanders.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Absolute skew beyond which a one-time warning is surfaced (five minutes)
pub const SKEW_WARN_THRESHOLD: Duration = Duration::minutes(5);

/// Process-wide drift state between the local clock and the remote's clock
///
/// Singleton with explicit init (from the last persisted server time on
/// startup) and explicit update (every network round trip that returns a
/// server timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClockState {
    /// Most recent server-reported instant
    pub last_server_time: Option<DateTime<Utc>>,
    /// Local instant at which that server time was observed
    pub last_local_time: Option<DateTime<Utc>>,
    /// `server - local` at the last observation, in milliseconds
    pub observed_skew_ms: i64,
}

impl ClockState {
    /// Initialize from a server time persisted by a previous run.
    ///
    /// Only the server reference is restored; skew is re-measured on the
    /// first live round trip rather than trusting a stale offset across
    /// suspend/resume or reboots.
    #[must_use]
    pub fn from_persisted(server_time: Option<DateTime<Utc>>) -> Self {
        Self {
            last_server_time: server_time,
            last_local_time: None,
            observed_skew_ms: 0,
        }
    }

    /// Record a server timestamp observed at local instant `local_now`.
    ///
    /// Returns true when the absolute skew newly crossed the warning
    /// threshold (the caller surfaces a one-time warning; sync continues).
    pub fn observe(&mut self, server_time: DateTime<Utc>, local_now: DateTime<Utc>) -> bool {
        let previous = Duration::milliseconds(self.observed_skew_ms);
        let skew = server_time - local_now;

        self.last_server_time = Some(server_time);
        self.last_local_time = Some(local_now);
        self.observed_skew_ms = skew.num_milliseconds();

        skew.abs() > SKEW_WARN_THRESHOLD && previous.abs() <= SKEW_WARN_THRESHOLD
    }

    /// Observed skew as a duration
    #[must_use]
    pub fn skew(&self) -> Duration {
        Duration::milliseconds(self.observed_skew_ms)
    }

    /// "Now" corrected toward the server's clock.
    ///
    /// Local-clock-anchored until the first server observation; skew
    /// correction kicks in afterwards.
    #[must_use]
    pub fn corrected_now(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        if self.last_local_time.is_some() {
            local_now + self.skew()
        } else {
            local_now
        }
    }

    /// Whether the current skew exceeds the warning threshold
    #[must_use]
    pub fn skew_excessive(&self) -> bool {
        self.skew().abs() > SKEW_WARN_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrected_now_is_local_until_first_observation() {
        let clock = ClockState::default();
        let now = Utc::now();
        assert_eq!(clock.corrected_now(now), now);
    }

    #[test]
    fn test_observe_tracks_skew() {
        let mut clock = ClockState::default();
        let local = Utc::now();
        let server = local + Duration::seconds(90);

        let crossed = clock.observe(server, local);
        assert!(!crossed); // 90s is under the 5 minute threshold
        assert_eq!(clock.skew(), Duration::seconds(90));
        assert_eq!(clock.corrected_now(local), local + Duration::seconds(90));
    }

    #[test]
    fn test_observe_warns_once_on_threshold_crossing() {
        let mut clock = ClockState::default();
        let local = Utc::now();

        // First observation beyond the threshold: warn
        assert!(clock.observe(local + Duration::minutes(10), local));
        assert!(clock.skew_excessive());

        // Still beyond: no repeat warning
        assert!(!clock.observe(local + Duration::minutes(11), local));

        // Back under, then beyond again: warn again
        assert!(!clock.observe(local + Duration::seconds(5), local));
        assert!(clock.observe(local - Duration::minutes(8), local));
    }

    #[test]
    fn test_from_persisted_does_not_trust_stale_skew() {
        let server = Utc::now() - Duration::hours(2);
        let clock = ClockState::from_persisted(Some(server));
        let now = Utc::now();
        // No local anchor yet, so no correction is applied
        assert_eq!(clock.corrected_now(now), now);
        assert_eq!(clock.last_server_time, Some(server));
    }
}
