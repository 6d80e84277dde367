//! Retry backoff policy
//!
//! Exponential delay with a hard ceiling and bounded jitter. Jitter keeps a
//! burst of items that failed together from retrying in lockstep against a
//! recovering server.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use flowtrack_core::config::RetryConfig;

/// Jitter bound as a fraction of the base delay (plus or minus 25%)
const JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff with jitter for failed deliveries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_ms: i64,
    max_ms: i64,
}

impl RetryPolicy {
    /// Creates a policy from the retry section of the configuration
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_ms: (config.base_delay_seconds.max(1) * 1000) as i64,
            max_ms: (config.max_delay_seconds.max(1) * 1000) as i64,
        }
    }

    /// Deterministic delay for an attempt, before jitter:
    /// `min(max_delay, base_delay * 2^attempt)`
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        // 2^attempt overflows fast; past 32 doublings the ceiling always wins.
        let ms = if attempt >= 32 {
            self.max_ms
        } else {
            self.base_ms
                .saturating_mul(1i64 << attempt)
                .min(self.max_ms)
        };
        Duration::milliseconds(ms)
    }

    /// Delay for an attempt with jitter applied
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).num_milliseconds() as f64;
        let factor = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
        Duration::milliseconds((base * factor) as i64)
    }

    /// Absolute retry instant for an attempt, relative to `now`
    #[must_use]
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay(attempt)
    }
}
