//! Privacy transformer
//!
//! Deterministic, stateless mapping from raw source events to sanitized,
//! remote-ready records. Given the same configuration the output is always
//! the same; there is no I/O and no error path. Malformed input is dropped
//! with a warning.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

use crate::config::PrivacyConfig;
use crate::domain::event::{BucketKind, RawEvent, SanitizedEvent};
use crate::domain::newtypes::BucketId;

/// Events shorter than this are noise and never leave the machine
const MIN_EVENT_DURATION_SECS: f64 = 1.0;

/// Number of hex chars kept from a hashed title
const TITLE_HASH_LEN: usize = 16;

/// Applies privacy rules to events before syncing
#[derive(Debug, Clone)]
pub struct PrivacyFilter {
    settings: PrivacyConfig,
}

impl PrivacyFilter {
    /// Creates a filter from the configured privacy settings
    #[must_use]
    pub fn new(settings: PrivacyConfig) -> Self {
        Self { settings }
    }

    /// Transforms one raw event into its sanitized form.
    ///
    /// Returns `None` when the event is filtered out entirely: excluded
    /// app, sub-second duration, unrecognized bucket kind, or a payload
    /// too malformed to represent.
    #[must_use]
    pub fn transform(
        &self,
        bucket: &BucketId,
        kind: BucketKind,
        event: &RawEvent,
    ) -> Option<SanitizedEvent> {
        if event.duration < MIN_EVENT_DURATION_SECS {
            return None;
        }

        let payload = match kind {
            BucketKind::Window => self.window_payload(event)?,
            BucketKind::Web => self.web_payload(event)?,
            BucketKind::Afk => self.afk_payload(bucket, event)?,
            BucketKind::Input => Self::input_payload(event),
            BucketKind::Other => return None,
        };

        Some(SanitizedEvent {
            key: event.key(bucket),
            timestamp: event.timestamp,
            duration: (event.duration * 100.0).round() / 100.0,
            payload,
            skew_adjusted: false,
        })
    }

    /// Whether the app is excluded from tracking entirely
    #[must_use]
    pub fn is_excluded_app(&self, app: Option<&str>) -> bool {
        match app {
            Some(app) => self.settings.exclude_apps.iter().any(|a| a == app),
            None => false,
        }
    }

    fn window_payload(&self, event: &RawEvent) -> Option<Map<String, Value>> {
        let app = event.field("app");
        if self.is_excluded_app(app) {
            return None;
        }

        let mut payload = Map::new();
        if let Some(app) = app {
            payload.insert("app".to_string(), Value::String(app.to_string()));
        }
        if let Some(title) = self.process_title(app, event.field("title")) {
            payload.insert("title".to_string(), Value::String(title));
        }
        if let Some(url) = self.process_url(event.field("url")) {
            payload.insert("url".to_string(), Value::String(url));
        }
        Some(payload)
    }

    fn web_payload(&self, event: &RawEvent) -> Option<Map<String, Value>> {
        let mut payload = Map::new();
        if let Some(url) = self.process_url(event.field("url")) {
            payload.insert("url".to_string(), Value::String(url));
        }
        if let Some(title) = self.process_title(None, event.field("title")) {
            payload.insert("title".to_string(), Value::String(title));
        }
        if payload.is_empty() {
            warn!(event_id = event.id, "Dropping web event with no usable fields");
            return None;
        }
        Some(payload)
    }

    fn afk_payload(&self, bucket: &BucketId, event: &RawEvent) -> Option<Map<String, Value>> {
        let Some(status) = event.field("status") else {
            warn!(
                bucket = %bucket,
                event_id = event.id,
                "Dropping afk event without status field"
            );
            return None;
        };
        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::String(status.to_string()));
        Some(payload)
    }

    fn input_payload(event: &RawEvent) -> Map<String, Value> {
        let mut payload = Map::new();
        for counter in ["presses", "clicks", "scrolls"] {
            let value = event
                .data
                .get(counter)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            payload.insert(counter.to_string(), Value::from(value));
        }
        payload
    }

    /// Processes a window title: allowlisted apps keep the raw title,
    /// everything else is hashed when `hash_titles` is on.
    #[must_use]
    pub fn process_title(&self, app: Option<&str>, title: Option<&str>) -> Option<String> {
        let title = title?;
        if title.is_empty() {
            return None;
        }

        if let Some(app) = app {
            if self.settings.title_allowlist.iter().any(|a| a == app) {
                return Some(title.to_string());
            }
        }

        if self.settings.hash_titles {
            return Some(hash_string(title));
        }

        Some(title.to_string())
    }

    /// Processes a URL: truncated to its host when `domain_only_urls` is
    /// on; unparseable URLs are dropped rather than leaked.
    #[must_use]
    pub fn process_url(&self, url: Option<&str>) -> Option<String> {
        let url = url?;
        if url.is_empty() {
            return None;
        }

        if !self.settings.domain_only_urls {
            return Some(url.to_string());
        }

        match Url::parse(url) {
            Ok(parsed) => parsed.host_str().map(str::to_string),
            Err(_) => None,
        }
    }
}

/// SHA-256 hash of a string, truncated to the first 16 hex chars:
/// unlinkable to the original but stable enough to group repeats.
#[must_use]
pub fn hash_string(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex = format!("{digest:x}");
    hex[..TITLE_HASH_LEN].to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn filter() -> PrivacyFilter {
        PrivacyFilter::new(PrivacyConfig::default())
    }

    fn window_event(app: &str, title: &str, duration: f64) -> RawEvent {
        let mut data = Map::new();
        data.insert("app".to_string(), Value::String(app.to_string()));
        data.insert("title".to_string(), Value::String(title.to_string()));
        RawEvent {
            id: 1,
            timestamp: Utc::now(),
            duration,
            data,
        }
    }

    fn bucket() -> BucketId {
        BucketId::new("aw-watcher-window_host").unwrap()
    }

    #[test]
    fn test_excluded_app_dropped_entirely() {
        let event = window_event("1Password", "Vault - Logins", 10.0);
        let result = filter().transform(&bucket(), BucketKind::Window, &event);
        assert!(result.is_none());
    }

    #[test]
    fn test_sub_second_event_dropped() {
        let event = window_event("Terminal", "zsh", 0.4);
        assert!(filter()
            .transform(&bucket(), BucketKind::Window, &event)
            .is_none());
    }

    #[test]
    fn test_title_hashed_by_default() {
        let event = window_event("Safari", "My Secret Meeting Notes", 30.0);
        let sanitized = filter()
            .transform(&bucket(), BucketKind::Window, &event)
            .unwrap();

        let title = sanitized.payload["title"].as_str().unwrap();
        assert_eq!(title.len(), 16);
        assert_ne!(title, "My Secret Meeting Notes");
        // Deterministic for the same input
        assert_eq!(title, hash_string("My Secret Meeting Notes"));
    }

    #[test]
    fn test_allowlisted_app_keeps_raw_title() {
        let event = window_event("Terminal", "vim src/main.rs", 30.0);
        let sanitized = filter()
            .transform(&bucket(), BucketKind::Window, &event)
            .unwrap();
        assert_eq!(sanitized.payload["title"], "vim src/main.rs");
    }

    #[test]
    fn test_url_truncated_to_domain() {
        let f = filter();
        assert_eq!(
            f.process_url(Some("https://github.com/flowtrack/flowtrack/pull/42?tab=files")),
            Some("github.com".to_string())
        );
        // Unparseable URLs are dropped, not leaked
        assert_eq!(f.process_url(Some("not a url")), None);
        assert_eq!(f.process_url(None), None);
    }

    #[test]
    fn test_afk_event_maps_status() {
        let mut data = Map::new();
        data.insert("status".to_string(), Value::String("afk".to_string()));
        let event = RawEvent {
            id: 2,
            timestamp: Utc::now(),
            duration: 120.0,
            data,
        };
        let sanitized = filter()
            .transform(&bucket(), BucketKind::Afk, &event)
            .unwrap();
        assert_eq!(sanitized.payload["status"], "afk");
    }

    #[test]
    fn test_afk_event_without_status_dropped() {
        let event = RawEvent {
            id: 3,
            timestamp: Utc::now(),
            duration: 120.0,
            data: Map::new(),
        };
        assert!(filter().transform(&bucket(), BucketKind::Afk, &event).is_none());
    }

    #[test]
    fn test_input_event_keeps_counters_only() {
        let mut data = Map::new();
        data.insert("presses".to_string(), Value::from(42u64));
        data.insert("clicks".to_string(), Value::from(7u64));
        data.insert("title".to_string(), Value::String("leak?".to_string()));
        let event = RawEvent {
            id: 4,
            timestamp: Utc::now(),
            duration: 60.0,
            data,
        };
        let sanitized = filter()
            .transform(&bucket(), BucketKind::Input, &event)
            .unwrap();
        assert_eq!(sanitized.payload["presses"], 42);
        assert_eq!(sanitized.payload["clicks"], 7);
        assert_eq!(sanitized.payload["scrolls"], 0);
        assert!(!sanitized.payload.contains_key("title"));
    }

    #[test]
    fn test_unknown_bucket_kind_dropped() {
        let event = window_event("App", "Title", 10.0);
        assert!(filter()
            .transform(&bucket(), BucketKind::Other, &event)
            .is_none());
    }

    #[test]
    fn test_duration_rounded_to_two_decimals() {
        let event = window_event("Terminal", "zsh", 3.14159);
        let sanitized = filter()
            .transform(&bucket(), BucketKind::Window, &event)
            .unwrap();
        assert_eq!(sanitized.duration, 3.14);
    }
}
