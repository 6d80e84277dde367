//! HTTP client for the remote ingestion API
//!
//! Speaks the agent-facing API: bearer token plus device id headers, JSON
//! bodies, and a `{success, data, meta}` response envelope on every route.
//!
//! ## Status mapping
//!
//! | Wire condition              | BatchOutcome                     |
//! |-----------------------------|----------------------------------|
//! | connect error / timeout     | `TransportFailure`               |
//! | 5xx                         | `TransportFailure` (retryable)   |
//! | 401 / 403                   | `Rejected` (operator action)     |
//! | other 4xx, `success: false` | `Rejected`                       |
//! | 200 with rejected keys      | `PartiallyAccepted`              |
//! | 200, all keys accepted      | `AllAccepted`                    |

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowtrack_core::config::RemoteConfig;
use flowtrack_core::domain::{AgentVersion, BucketId, EventKey, SanitizedEvent};
use flowtrack_core::ports::{BatchOutcome, BatchResponse, HeartbeatAck, IRemoteSink};

/// Header carrying the registered device id
const DEVICE_ID_HEADER: &str = "X-Device-ID";

// ============================================================================
// Wire types
// ============================================================================

/// Outbound shape of one sanitized event
#[derive(Debug, Serialize)]
struct WireEvent<'a> {
    bucket_id: &'a str,
    event_id: &'a str,
    timestamp: DateTime<Utc>,
    duration: f64,
    payload: &'a serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skew_adjusted: bool,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    agent_version: &'a str,
    events: Vec<WireEvent<'a>>,
}

/// The `{success, data, meta}` envelope every route answers with
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    server_time: Option<DateTime<Utc>>,
    #[serde(default)]
    minimum_agent_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireKey {
    bucket_id: String,
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct WireRejection {
    bucket_id: String,
    event_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchData {
    #[serde(default)]
    accepted: Vec<WireKey>,
    #[serde(default)]
    rejected: Vec<WireRejection>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatData {
    #[allow(dead_code)]
    #[serde(default)]
    status: Option<String>,
}

fn wire_key_to_event_key(bucket_id: String, event_id: String) -> Option<EventKey> {
    match BucketId::new(bucket_id) {
        Ok(bucket) => Some(EventKey::new(bucket, event_id)),
        Err(_) => {
            warn!("Remote response contained a key with an empty bucket id");
            None
        }
    }
}

fn parse_min_version(meta: Option<&Meta>) -> Option<AgentVersion> {
    let raw = meta?.minimum_agent_version.as_deref()?;
    match raw.parse::<AgentVersion>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(raw, %e, "Ignoring unparseable minimum_agent_version from server");
            None
        }
    }
}

// ============================================================================
// IngestClient
// ============================================================================

/// HTTP adapter for the remote ingestion service
pub struct IngestClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    device_id: Option<String>,
    agent_version: String,
}

impl IngestClient {
    /// Creates a client from the remote section of the configuration
    pub fn new(config: &RemoteConfig, agent_version: AgentVersion) -> Self {
        // Builder failure means a broken TLS backend; fail at startup
        // rather than continue with a client that has no timeouts.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(10)))
            .build()
            .expect("Failed to construct HTTP client for the ingestion API");
        Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            device_id: config.device_id.clone(),
            agent_version: agent_version.to_string(),
        }
    }

    /// Creates a client against a custom base URL (useful for testing)
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_token: Option<String>,
        device_id: Option<String>,
        agent_version: AgentVersion,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            api_token,
            device_id,
            agent_version: agent_version.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref token) = self.api_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref device_id) = self.device_id {
            builder = builder.header(DEVICE_ID_HEADER, device_id);
        }
        builder
    }

    /// Maps an HTTP error status to an outcome; `None` means the body
    /// should still be parsed as an envelope.
    fn outcome_for_status(status: StatusCode, body: &str) -> Option<BatchOutcome> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Some(BatchOutcome::Rejected {
                reason: format!("authentication refused ({status}): token invalid or revoked"),
            });
        }
        if status.is_server_error() {
            return Some(BatchOutcome::TransportFailure {
                reason: format!("server error {status}"),
            });
        }
        if status.is_client_error() {
            let detail = serde_json::from_str::<Envelope<serde_json::Value>>(body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Some(BatchOutcome::Rejected {
                reason: format!("{status}: {detail}"),
            });
        }
        None
    }
}

#[async_trait::async_trait]
impl IRemoteSink for IngestClient {
    async fn send_batch(&self, events: &[SanitizedEvent]) -> anyhow::Result<BatchResponse> {
        let body = BatchRequest {
            agent_version: &self.agent_version,
            events: events
                .iter()
                .map(|e| WireEvent {
                    bucket_id: e.key.bucket.as_str(),
                    event_id: &e.key.event_id,
                    timestamp: e.timestamp,
                    duration: e.duration,
                    payload: &e.payload,
                    skew_adjusted: e.skew_adjusted,
                })
                .collect(),
        };

        let response = match self
            .request(reqwest::Method::POST, "/events/batch")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(BatchResponse {
                    outcome: BatchOutcome::TransportFailure {
                        reason: format!("request failed: {e}"),
                    },
                    server_time: None,
                    minimum_agent_version: None,
                });
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Ok(BatchResponse {
                    outcome: BatchOutcome::TransportFailure {
                        reason: format!("failed to read response body: {e}"),
                    },
                    server_time: None,
                    minimum_agent_version: None,
                });
            }
        };

        // Envelope meta is worth extracting even from error bodies.
        let envelope = serde_json::from_str::<Envelope<BatchData>>(&text).ok();
        let meta = envelope.as_ref().and_then(|e| e.meta.as_ref());
        let server_time = meta.and_then(|m| m.server_time);
        let minimum_agent_version = parse_min_version(meta);

        if let Some(outcome) = Self::outcome_for_status(status, &text) {
            return Ok(BatchResponse {
                outcome,
                server_time,
                minimum_agent_version,
            });
        }

        let Some(envelope) = envelope else {
            return Ok(BatchResponse {
                outcome: BatchOutcome::TransportFailure {
                    reason: format!("unparseable response body ({status})"),
                },
                server_time,
                minimum_agent_version,
            });
        };

        if !envelope.success {
            return Ok(BatchResponse {
                outcome: BatchOutcome::Rejected {
                    reason: envelope
                        .error
                        .unwrap_or_else(|| "server reported failure without detail".to_string()),
                },
                server_time,
                minimum_agent_version,
            });
        }

        let data = envelope.data.unwrap_or(BatchData {
            accepted: Vec::new(),
            rejected: Vec::new(),
        });

        let confirmed: Vec<EventKey> = data
            .accepted
            .into_iter()
            .filter_map(|k| wire_key_to_event_key(k.bucket_id, k.event_id))
            .collect();
        let rejected: Vec<(EventKey, String)> = data
            .rejected
            .into_iter()
            .filter_map(|r| {
                wire_key_to_event_key(r.bucket_id, r.event_id)
                    .map(|key| (key, r.reason.unwrap_or_else(|| "unspecified".to_string())))
            })
            .collect();

        debug!(
            sent = events.len(),
            accepted = confirmed.len(),
            rejected = rejected.len(),
            "Batch submitted"
        );

        let outcome = if rejected.is_empty() {
            BatchOutcome::AllAccepted { confirmed }
        } else {
            BatchOutcome::PartiallyAccepted { confirmed, rejected }
        };

        Ok(BatchResponse {
            outcome,
            server_time,
            minimum_agent_version,
        })
    }

    async fn heartbeat(&self) -> anyhow::Result<HeartbeatAck> {
        let response = match self
            .request(reqwest::Method::GET, "/heartbeat")
            .send()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                return Ok(HeartbeatAck {
                    reachable: false,
                    server_time: None,
                    minimum_agent_version: None,
                });
            }
        };

        let reachable = response.status().is_success();
        let envelope = response
            .json::<Envelope<HeartbeatData>>()
            .await
            .ok();
        let meta = envelope.as_ref().and_then(|e| e.meta.as_ref());

        Ok(HeartbeatAck {
            reachable,
            server_time: meta.and_then(|m| m.server_time),
            minimum_agent_version: parse_min_version(meta),
        })
    }
}
