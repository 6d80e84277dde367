//! HTTP client for the local activity source
//!
//! Talks to an ActivityWatch-compatible REST API (`/api/0/...`) on
//! localhost. Every failure maps to [`SyncError::SourceUnavailable`]; the
//! engine treats that as "skip this cycle", so this client never needs a
//! retry loop of its own.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use flowtrack_core::config::SourceConfig;
use flowtrack_core::domain::{BucketId, BucketKind, RawEvent, SyncError};
use flowtrack_core::ports::{ISourceReader, SourceBucket};

// ============================================================================
// Wire types
// ============================================================================

/// One bucket entry from `GET /api/0/buckets/`
#[derive(Debug, Deserialize)]
struct BucketEntry {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    bucket_type: Option<String>,
    hostname: Option<String>,
}

/// One event from `GET /api/0/buckets/{id}/events`
#[derive(Debug, Deserialize)]
struct EventEntry {
    id: i64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// ActivitySourceClient
// ============================================================================

/// HTTP adapter for the local activity source
pub struct ActivitySourceClient {
    client: Client,
    base_url: String,
}

impl ActivitySourceClient {
    /// Creates a client from the source section of the configuration
    pub fn new(config: &SourceConfig) -> Self {
        Self::with_base_url(config.base_url(), config.timeout_seconds)
    }

    /// Creates a client against a custom base URL (useful for testing)
    pub fn with_base_url(base_url: impl Into<String>, timeout_seconds: u64) -> Self {
        // Builder failure means a broken TLS backend; fail at startup
        // rather than continue with a client that has no timeouts.
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .connect_timeout(Duration::from_secs(timeout_seconds.min(5)))
            .build()
            .expect("Failed to construct HTTP client for the activity source");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unavailable(context: &str, err: impl std::fmt::Display) -> SyncError {
        SyncError::SourceUnavailable(format!("{context}: {err}"))
    }
}

#[async_trait::async_trait]
impl ISourceReader for ActivitySourceClient {
    async fn list_buckets(&self) -> Result<Vec<SourceBucket>, SyncError> {
        let buckets: HashMap<String, BucketEntry> = self
            .client
            .get(self.url("/api/0/buckets/"))
            .send()
            .await
            .map_err(|e| Self::unavailable("bucket discovery request failed", e))?
            .error_for_status()
            .map_err(|e| Self::unavailable("bucket discovery returned error status", e))?
            .json()
            .await
            .map_err(|e| Self::unavailable("bucket discovery response unparseable", e))?;

        let mut discovered = Vec::with_capacity(buckets.len());
        for (key, entry) in buckets {
            // Some servers omit the redundant id field inside the entry.
            let id = if entry.id.is_empty() { key } else { entry.id };
            let Ok(bucket_id) = BucketId::new(id) else {
                warn!("Skipping source bucket with empty id");
                continue;
            };
            let kind = entry
                .bucket_type
                .as_deref()
                .map(BucketKind::from_type_str)
                .unwrap_or(BucketKind::Other);
            discovered.push(SourceBucket {
                id: bucket_id,
                kind,
                hostname: entry.hostname.unwrap_or_default(),
            });
        }

        debug!(count = discovered.len(), "Discovered source buckets");
        Ok(discovered)
    }

    async fn fetch_since(
        &self,
        bucket: &BucketId,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawEvent>, SyncError> {
        let path = format!("/api/0/buckets/{}/events", bucket.as_str());
        let entries: Vec<EventEntry> = self
            .client
            .get(self.url(&path))
            .query(&[
                ("start", since.to_rfc3339()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Self::unavailable("event fetch request failed", e))?
            .error_for_status()
            .map_err(|e| Self::unavailable("event fetch returned error status", e))?
            .json()
            .await
            .map_err(|e| Self::unavailable("event fetch response unparseable", e))?;

        // The source reports newest first; the engine wants oldest first so
        // checkpoints advance monotonically within a batch.
        let mut events: Vec<RawEvent> = entries
            .into_iter()
            .filter(|e| e.timestamp > since)
            .map(|e| RawEvent {
                id: e.id,
                timestamp: e.timestamp,
                duration: e.duration,
                data: e.data,
            })
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        debug!(
            bucket = %bucket,
            since = %since,
            count = events.len(),
            "Fetched source events"
        );
        Ok(events)
    }

    async fn is_available(&self) -> bool {
        match self.client.get(self.url("/api/0/info")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
