//! Integration tests for the SQLite queue store
//!
//! Uses in-memory databases so every test starts from a clean schema.

use std::io::Write;

use chrono::{Duration, Utc};
use serde_json::{Map, Value};

use flowtrack_core::domain::{BucketId, Checkpoint, EventKey, SanitizedEvent};
use flowtrack_core::ports::{IQueueStore, IntegrityStatus};
use flowtrack_store::{DatabasePool, SqliteQueueStore};

async fn store() -> SqliteQueueStore {
    store_with_cap(100_000).await
}

async fn store_with_cap(max_queue_size: u32) -> SqliteQueueStore {
    let pool = DatabasePool::in_memory().await.unwrap();
    SqliteQueueStore::new(pool.pool().clone(), max_queue_size)
}

fn bucket(name: &str) -> BucketId {
    BucketId::new(name).unwrap()
}

fn event(bucket_name: &str, id: &str) -> SanitizedEvent {
    let mut payload = Map::new();
    payload.insert("app".to_string(), Value::String("Terminal".to_string()));
    SanitizedEvent {
        key: EventKey::new(bucket(bucket_name), id),
        timestamp: Utc::now(),
        duration: 5.0,
        payload,
        skew_adjusted: false,
    }
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_key() {
    let store = store().await;
    let now = Utc::now();

    let events = vec![event("b1", "1"), event("b1", "2")];
    let inserted = store.enqueue(&events, now, now).await.unwrap();
    assert_eq!(inserted, 2);

    // Replaying the same fetch inserts nothing new
    let inserted = store.enqueue(&events, now, now).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(store.depth().await.unwrap(), 2);
}

#[tokio::test]
async fn test_dequeue_orders_oldest_first_and_marks_in_flight() {
    let store = store().await;
    let now = Utc::now();

    store
        .enqueue(&[event("b1", "1")], now - Duration::minutes(10), now)
        .await
        .unwrap();
    store
        .enqueue(&[event("b1", "2")], now - Duration::minutes(5), now)
        .await
        .unwrap();

    let batch = store.dequeue_ready(now, 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].event.key.event_id, "1");
    assert_eq!(batch[1].event.key.event_id, "2");

    // In-flight rows are invisible to a second dequeue
    let again = store.dequeue_ready(now, 10).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_dequeue_respects_retry_time_and_limit() {
    let store = store().await;
    let now = Utc::now();

    store
        .enqueue(&[event("b1", "1"), event("b1", "2")], now, now)
        .await
        .unwrap();
    store
        .enqueue(&[event("b1", "3")], now, now + Duration::minutes(1))
        .await
        .unwrap();

    // Event 3 is not yet due
    let batch = store.dequeue_ready(now, 10).await.unwrap();
    assert_eq!(batch.len(), 2);

    store.release_in_flight().await.unwrap();
    let limited = store.dequeue_ready(now, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_reschedule_increments_attempts_and_releases() {
    let store = store().await;
    let now = Utc::now();

    store.enqueue(&[event("b1", "1")], now, now).await.unwrap();
    let batch = store.dequeue_ready(now, 10).await.unwrap();
    assert_eq!(batch[0].attempt_count, 0);

    let retry_at = now + Duration::seconds(30);
    store
        .reschedule(&[(batch[0].id, retry_at)])
        .await
        .unwrap();

    // Not due yet
    assert!(store.dequeue_ready(now, 10).await.unwrap().is_empty());

    // Due after the retry time, with the attempt recorded
    let batch = store.dequeue_ready(retry_at, 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].attempt_count, 1);
}

#[tokio::test]
async fn test_commit_confirmed_removes_rows_and_advances_checkpoint() {
    let store = store().await;
    let now = Utc::now();

    let e1 = event("b1", "1");
    let e2 = event("b1", "2");
    store.enqueue(&[e1.clone(), e2.clone()], now, now).await.unwrap();

    let cp = Checkpoint::new(bucket("b1"), now, Some("2".to_string()));
    store
        .commit_confirmed(&[e1.key.clone(), e2.key.clone()], &[cp.clone()])
        .await
        .unwrap();

    assert_eq!(store.depth().await.unwrap(), 0);
    let stored = store.get_checkpoint(&bucket("b1")).await.unwrap().unwrap();
    assert_eq!(stored, cp);
}

#[tokio::test]
async fn test_commit_confirmed_never_regresses_checkpoint() {
    let store = store().await;
    let now = Utc::now();

    let newer = Checkpoint::new(bucket("b1"), now, Some("9".to_string()));
    store.commit_confirmed(&[], &[newer.clone()]).await.unwrap();

    let older = Checkpoint::new(bucket("b1"), now - Duration::minutes(5), Some("3".to_string()));
    store.commit_confirmed(&[], &[older]).await.unwrap();

    let stored = store.get_checkpoint(&bucket("b1")).await.unwrap().unwrap();
    assert_eq!(stored, newer);
}

#[tokio::test]
async fn test_contains_keys_reports_queued_subset() {
    let store = store().await;
    let now = Utc::now();

    let e1 = event("b1", "1");
    store.enqueue(&[e1.clone()], now, now).await.unwrap();

    let absent = EventKey::new(bucket("b1"), "99");
    let present = store
        .contains_keys(&[e1.key.clone(), absent])
        .await
        .unwrap();
    assert_eq!(present, vec![e1.key]);
}

#[tokio::test]
async fn test_compact_expired_skips_in_flight_rows() {
    let store = store().await;
    let now = Utc::now();
    let old = now - Duration::days(40);

    store
        .enqueue(&[event("b1", "1"), event("b1", "2")], old, now)
        .await
        .unwrap();

    // Hand one row to an in-progress send
    store.release_in_flight().await.unwrap();
    let batch = store.dequeue_ready(now, 1).await.unwrap();
    assert_eq!(batch.len(), 1);

    let removed = store
        .compact_expired(Duration::days(30), now)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_release_in_flight_recovers_after_crash() {
    let store = store().await;
    let now = Utc::now();

    store.enqueue(&[event("b1", "1")], now, now).await.unwrap();
    store.dequeue_ready(now, 10).await.unwrap();
    assert!(store.dequeue_ready(now, 10).await.unwrap().is_empty());

    let released = store.release_in_flight().await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(store.dequeue_ready(now, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_ceiling_evicts_oldest() {
    let store = store_with_cap(3).await;
    let now = Utc::now();

    for i in 0..3 {
        store
            .enqueue(
                &[event("b1", &i.to_string())],
                now - Duration::minutes(10 - i),
                now,
            )
            .await
            .unwrap();
    }
    store.enqueue(&[event("b1", "new")], now, now).await.unwrap();

    assert_eq!(store.depth().await.unwrap(), 3);
    let remaining = store.dequeue_ready(now, 10).await.unwrap();
    let ids: Vec<&str> = remaining
        .iter()
        .map(|item| item.event.key.event_id.as_str())
        .collect();
    // Oldest row ("0") was evicted
    assert_eq!(ids, vec!["1", "2", "new"]);
}

#[tokio::test]
async fn test_set_and_all_checkpoints() {
    let store = store().await;
    let now = Utc::now();

    store
        .set_checkpoint(&Checkpoint::new(bucket("b1"), now, None))
        .await
        .unwrap();
    store
        .set_checkpoint(&Checkpoint::new(bucket("b2"), now, Some("5".to_string())))
        .await
        .unwrap();

    let all = store.all_checkpoints().await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_meta_round_trip() {
    let store = store().await;

    assert!(store.get_meta("server_time").await.unwrap().is_none());
    store.set_meta("server_time", "2026-08-01T00:00:00Z").await.unwrap();
    assert_eq!(
        store.get_meta("server_time").await.unwrap().as_deref(),
        Some("2026-08-01T00:00:00Z")
    );

    store.set_meta("server_time", "2026-08-02T00:00:00Z").await.unwrap();
    assert_eq!(
        store.get_meta("server_time").await.unwrap().as_deref(),
        Some("2026-08-02T00:00:00Z")
    );
}

#[tokio::test]
async fn test_integrity_check_passes_on_fresh_store() {
    let store = store().await;
    assert_eq!(store.integrity_check().await.unwrap(), IntegrityStatus::Ok);
}

#[tokio::test]
async fn test_open_rejects_garbage_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"this is not a sqlite database, not even close")
        .unwrap();
    drop(file);

    assert!(DatabasePool::new(&path).await.is_err());
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("queue.db");
    let now = Utc::now();

    {
        let pool = DatabasePool::new(&path).await.unwrap();
        let store = SqliteQueueStore::new(pool.pool().clone(), 100);
        store.enqueue(&[event("b1", "1")], now, now).await.unwrap();
        pool.close().await;
    }

    let pool = DatabasePool::new(&path).await.unwrap();
    let store = SqliteQueueStore::new(pool.pool().clone(), 100);
    assert_eq!(store.depth().await.unwrap(), 1);
}
