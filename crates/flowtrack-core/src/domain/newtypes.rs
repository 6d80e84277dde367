//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow between the sync
//! engine, the queue store, and the HTTP adapters. Each newtype ensures
//! validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// BucketId
// ============================================================================

/// Identifier of a source event stream (e.g. `aw-watcher-window_host`)
///
/// Bucket ids come from the local activity source's discovery endpoint and
/// key both checkpoints and event dedup. They must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    /// Create a BucketId, rejecting empty strings
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidBucketId(
                "bucket id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BucketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BucketId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// EventKey
// ============================================================================

/// Dedup identity of an event: `(bucket, source event id)`
///
/// Unique across the lifetime of the queue. Re-observing the same key is a
/// no-op everywhere in the engine; this is what makes replayed fetches after
/// a crash safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    /// Originating bucket
    pub bucket: BucketId,
    /// Event id, unique within the bucket
    pub event_id: String,
}

impl EventKey {
    /// Create a new event key
    pub fn new(bucket: BucketId, event_id: impl Into<String>) -> Self {
        Self {
            bucket,
            event_id: event_id.into(),
        }
    }
}

impl Display for EventKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.event_id)
    }
}

// ============================================================================
// QueueItemId
// ============================================================================

/// Row id of a durable queue item (SQLite AUTOINCREMENT key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(i64);

impl QueueItemId {
    /// Wrap a raw row id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw row id
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for QueueItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for QueueItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// AgentVersion
// ============================================================================

/// Semantic agent version used for the remote compatibility gate
///
/// The remote service may report a `minimum_agent_version`; when the running
/// version compares below it, the engine stops sending (but keeps queuing)
/// until the operator upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl AgentVersion {
    /// Create a version from its components
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Display for AgentVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for AgentVersion {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().trim_start_matches('v').splitn(3, '.');
        let mut next = |name: &str| -> Result<u16, DomainError> {
            parts
                .next()
                .ok_or_else(|| {
                    DomainError::InvalidVersion(format!("missing {name} component in '{s}'"))
                })?
                .parse::<u16>()
                .map_err(|e| DomainError::InvalidVersion(format!("bad {name} in '{s}': {e}")))
        };
        Ok(Self {
            major: next("major")?,
            minor: next("minor")?,
            patch: next("patch")?,
        })
    }
}

impl Serialize for AgentVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_id_rejects_empty() {
        assert!(BucketId::new("").is_err());
        assert!(BucketId::new("   ").is_err());
        assert!(BucketId::new("aw-watcher-window_host").is_ok());
    }

    #[test]
    fn test_event_key_display() {
        let key = EventKey::new(BucketId::new("b1").unwrap(), "42");
        assert_eq!(key.to_string(), "b1/42");
    }

    #[test]
    fn test_agent_version_parse_and_order() {
        let v1: AgentVersion = "1.2.3".parse().unwrap();
        let v2: AgentVersion = "1.10.0".parse().unwrap();
        assert_eq!(v1, AgentVersion::new(1, 2, 3));
        assert!(v2 > v1);
        assert!("1.2".parse::<AgentVersion>().is_err());
        assert!("a.b.c".parse::<AgentVersion>().is_err());
    }

    #[test]
    fn test_agent_version_tolerates_v_prefix() {
        let v: AgentVersion = "v2.0.1".parse().unwrap();
        assert_eq!(v, AgentVersion::new(2, 0, 1));
    }

    #[test]
    fn test_agent_version_serde_round_trip() {
        let v = AgentVersion::new(1, 4, 2);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.4.2\"");
        let back: AgentVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
