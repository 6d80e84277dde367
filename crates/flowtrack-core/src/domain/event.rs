//! Event types: raw observations from the source, sanitized records for the remote
//!
//! A [`RawEvent`] is exactly what the local activity source reports. The
//! privacy transformer turns it into a [`SanitizedEvent`], which is the only
//! shape that ever leaves the machine or touches the durable queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::newtypes::{BucketId, EventKey};

/// Category of a source bucket, derived from the source's bucket type string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    /// Foreground window focus events (app, title, optionally url)
    Window,
    /// Away-from-keyboard status events
    Afk,
    /// Browser tab events (url, title)
    Web,
    /// Input activity counters (presses, clicks, scrolls)
    Input,
    /// Anything else; fetched but dropped by the transformer
    Other,
}

impl BucketKind {
    /// Map the source's bucket `type` field to a kind.
    ///
    /// Both the legacy names (`currentwindow`, `afkstatus`) and the
    /// watcher-style names (`aw-watcher-window`, ...) are in the wild.
    #[must_use]
    pub fn from_type_str(s: &str) -> Self {
        match s {
            "currentwindow" | "aw-watcher-window" => BucketKind::Window,
            "afkstatus" | "aw-watcher-afk" => BucketKind::Afk,
            "aw-watcher-web" => BucketKind::Web,
            "aw-watcher-input" => BucketKind::Input,
            _ => BucketKind::Other,
        }
    }
}

/// One discrete activity observation as reported by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source-assigned event id, unique within its bucket
    pub id: i64,
    /// Source-reported instant the observation started
    pub timestamp: DateTime<Utc>,
    /// Observation length in seconds
    pub duration: f64,
    /// Free-form observation payload (app/title/url, afk status, counters)
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RawEvent {
    /// Dedup key of this event within the given bucket
    #[must_use]
    pub fn key(&self, bucket: &BucketId) -> EventKey {
        EventKey::new(bucket.clone(), self.id.to_string())
    }

    /// String field accessor into the payload
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

/// A privacy-transformed event, ready for the remote ingestion API
///
/// Created by the privacy transformer, optionally persisted by the queue
/// store, destroyed once the remote confirms acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedEvent {
    /// Dedup identity `(bucket, source event id)`
    pub key: EventKey,
    /// Event instant; clamped to corrected-now if it lay in the future
    pub timestamp: DateTime<Utc>,
    /// Duration in seconds, rounded to 2 decimals by the transformer
    pub duration: f64,
    /// Sanitized key/value payload
    pub payload: Map<String, Value>,
    /// True when the timestamp was clamped due to clock skew
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skew_adjusted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_kind_covers_both_naming_schemes() {
        assert_eq!(BucketKind::from_type_str("currentwindow"), BucketKind::Window);
        assert_eq!(
            BucketKind::from_type_str("aw-watcher-window"),
            BucketKind::Window
        );
        assert_eq!(BucketKind::from_type_str("afkstatus"), BucketKind::Afk);
        assert_eq!(BucketKind::from_type_str("aw-watcher-afk"), BucketKind::Afk);
        assert_eq!(BucketKind::from_type_str("aw-watcher-web"), BucketKind::Web);
        assert_eq!(
            BucketKind::from_type_str("aw-watcher-input"),
            BucketKind::Input
        );
        assert_eq!(BucketKind::from_type_str("mystery"), BucketKind::Other);
    }

    #[test]
    fn test_raw_event_key_and_field() {
        let mut data = Map::new();
        data.insert("app".to_string(), Value::String("Terminal".to_string()));
        let event = RawEvent {
            id: 7,
            timestamp: Utc::now(),
            duration: 12.5,
            data,
        };
        let bucket = BucketId::new("b").unwrap();
        assert_eq!(event.key(&bucket).event_id, "7");
        assert_eq!(event.field("app"), Some("Terminal"));
        assert_eq!(event.field("missing"), None);
    }

    #[test]
    fn test_sanitized_event_serde_omits_default_skew_flag() {
        let event = SanitizedEvent {
            key: EventKey::new(BucketId::new("b").unwrap(), "1"),
            timestamp: Utc::now(),
            duration: 1.0,
            payload: Map::new(),
            skew_adjusted: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("skew_adjusted"));
    }
}
