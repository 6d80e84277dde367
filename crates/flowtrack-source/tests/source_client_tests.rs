//! Integration tests for the activity source client
//!
//! Uses wiremock to simulate an ActivityWatch-compatible REST API.

use chrono::{DateTime, Duration, Utc};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flowtrack_core::domain::{BucketId, BucketKind, SyncError};
use flowtrack_core::ports::ISourceReader;
use flowtrack_source::ActivitySourceClient;

fn client(server: &MockServer) -> ActivitySourceClient {
    ActivitySourceClient::with_base_url(server.uri(), 5)
}

#[tokio::test]
async fn test_list_buckets_discovers_and_categorizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/0/buckets/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "aw-watcher-window_host": {
                "id": "aw-watcher-window_host",
                "type": "currentwindow",
                "hostname": "host"
            },
            "aw-watcher-afk_host": {
                "id": "aw-watcher-afk_host",
                "type": "afkstatus",
                "hostname": "host"
            },
            "custom-bucket": {
                "id": "custom-bucket",
                "type": "something-else",
                "hostname": "host"
            }
        })))
        .mount(&server)
        .await;

    let mut buckets = client(&server).list_buckets().await.unwrap();
    buckets.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(buckets.len(), 3);
    assert_eq!(buckets[0].id.as_str(), "aw-watcher-afk_host");
    assert_eq!(buckets[0].kind, BucketKind::Afk);
    assert_eq!(buckets[1].kind, BucketKind::Window);
    assert_eq!(buckets[2].kind, BucketKind::Other);
}

#[tokio::test]
async fn test_fetch_since_orders_oldest_first_and_drops_stale() {
    let server = MockServer::start().await;
    let since: DateTime<Utc> = "2026-08-01T12:00:00Z".parse().unwrap();

    // The source reports newest first, plus one event at the cursor itself
    Mock::given(method("GET"))
        .and(path("/api/0/buckets/aw-watcher-window_host/events"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": 3,
                "timestamp": "2026-08-01T12:02:00Z",
                "duration": 30.0,
                "data": {"app": "Terminal", "title": "vim"}
            },
            {
                "id": 2,
                "timestamp": "2026-08-01T12:01:00Z",
                "duration": 15.5,
                "data": {"app": "Firefox"}
            },
            {
                "id": 1,
                "timestamp": "2026-08-01T12:00:00Z",
                "duration": 5.0,
                "data": {}
            }
        ])))
        .mount(&server)
        .await;

    let bucket = BucketId::new("aw-watcher-window_host").unwrap();
    let events = client(&server)
        .fetch_since(&bucket, since, 100)
        .await
        .unwrap();

    // Event 1 sits exactly at the cursor and is excluded (strictly after)
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 2);
    assert_eq!(events[1].id, 3);
    assert_eq!(events[0].field("app"), Some("Firefox"));
}

#[tokio::test]
async fn test_fetch_since_sends_cursor_as_start_param() {
    let server = MockServer::start().await;
    let since: DateTime<Utc> = "2026-08-01T12:00:00Z".parse().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/0/buckets/b/events"))
        .and(query_param("start", since.to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let bucket = BucketId::new("b").unwrap();
    let events = client(&server).fetch_since(&bucket, since, 10).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_server_error_maps_to_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/0/buckets/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server).list_buckets().await.unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_unreachable_server_maps_to_source_unavailable() {
    // Nothing listens on this port
    let client = ActivitySourceClient::with_base_url("http://127.0.0.1:1", 1);
    let bucket = BucketId::new("b").unwrap();
    let err = client
        .fetch_since(&bucket, Utc::now() - Duration::hours(1), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_is_available_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/0/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hostname": "host", "version": "0.12.0"
        })))
        .mount(&server)
        .await;

    assert!(client(&server).is_available().await);

    let dead = ActivitySourceClient::with_base_url("http://127.0.0.1:1", 1);
    assert!(!dead.is_available().await);
}
