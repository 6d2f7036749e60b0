use chrono::{TimeZone, Utc};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{
    connected, connected_within, ConnectionStatus, PartialRecord, RecordStore, StateError,
    TelemetryRecord, TelemetryState, DEFAULT_CONNECTED_THRESHOLD, KNOWN_FIELDS,
};
use tempfile::TempDir;

fn partial(value: serde_json::Value) -> PartialRecord {
    PartialRecord::from_value(value).unwrap()
}

fn open_state(dir: &TempDir) -> TelemetryState {
    TelemetryState::open(RecordStore::new(dir.path().join("data.json")))
}

fn mirror(dir: &TempDir) -> TelemetryRecord {
    RecordStore::new(dir.path().join("data.json")).load().unwrap()
}

#[tokio::test]
async fn given_fresh_start_when_snapshot_taken_then_all_known_fields_are_zero() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    let snapshot = state.snapshot().await;

    for field in KNOWN_FIELDS {
        assert_eq!(snapshot.number(field), Some(0.0), "field {}", field);
    }
    assert!(dir.path().join("data.json").exists());
}

#[tokio::test]
async fn given_sequential_merges_then_last_writer_wins_per_field() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    state
        .merge(&partial(json!({"heart_rate": 70, "spo2": 97})))
        .await
        .unwrap();
    let merged = state
        .merge(&partial(json!({"heart_rate": 75, "temperature": 36.9})))
        .await
        .unwrap();

    assert_eq!(merged.number("heart_rate"), Some(75.0));
    assert_eq!(merged.number("spo2"), Some(97.0));
    assert_eq!(merged.number("temperature"), Some(36.9));
    assert_eq!(merged.number("latitude"), Some(0.0));
    assert_eq!(merged.number("longitude"), Some(0.0));
}

#[tokio::test]
async fn given_merge_then_durable_mirror_matches_memory() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    let merged = state
        .merge(&partial(json!({"latitude": 40.4168, "longitude": -3.7038, "fix": "3d"})))
        .await
        .unwrap();

    let reloaded = mirror(&dir);
    assert_eq!(reloaded, merged);
    assert_eq!(reloaded.get("fix"), Some(&json!("3d")));
}

#[tokio::test]
async fn given_restart_then_persisted_record_is_restored() {
    let dir = TempDir::new().unwrap();
    let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    {
        let state = open_state(&dir);
        state
            .merge_at(&partial(json!({"spo2": 96})), at)
            .await
            .unwrap();
    }

    let restarted = open_state(&dir);
    let snapshot = restarted.snapshot().await;

    assert_eq!(snapshot.number("spo2"), Some(96.0));
    assert_eq!(snapshot.last_update_time(), Some(at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_disjoint_merges_then_no_update_is_lost() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(open_state(&dir));

    let heart = {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.merge(&partial(json!({"heart_rate": 72}))).await })
    };
    let oxygen = {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.merge(&partial(json!({"spo2": 98}))).await })
    };
    heart.await.unwrap().unwrap();
    oxygen.await.unwrap().unwrap();

    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.number("heart_rate"), Some(72.0));
    assert_eq!(snapshot.number("spo2"), Some(98.0));
    assert_eq!(mirror(&dir), snapshot);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_many_concurrent_writers_then_every_field_lands() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(open_state(&dir));

    let mut handles = Vec::new();
    for i in 0..32 {
        let state = Arc::clone(&state);
        handles.push(tokio::spawn(async move {
            let mut fields = serde_json::Map::new();
            fields.insert(format!("sensor_{}", i), json!(i));
            state.merge(&partial(serde_json::Value::Object(fields))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = state.snapshot().await;
    for i in 0..32 {
        assert_eq!(snapshot.get(&format!("sensor_{}", i)), Some(&json!(i)));
    }
    assert_eq!(mirror(&dir), snapshot);
}

#[tokio::test]
async fn given_unwritable_mirror_when_merged_then_memory_is_updated_and_caller_informed() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    let state = TelemetryState::open(RecordStore::new(blocker.join("data.json")));

    let err = state
        .merge(&partial(json!({"heart_rate": 88})))
        .await
        .unwrap_err();

    assert!(matches!(err, StateError::NotPersisted { .. }));
    assert_eq!(
        err.merged_record().and_then(|r| r.number("heart_rate")),
        Some(88.0)
    );
    assert_eq!(state.snapshot().await.number("heart_rate"), Some(88.0));
}

#[tokio::test]
async fn given_corrupt_mirror_when_opened_then_defaults_are_served() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.json");
    fs::write(&path, "not json at all").unwrap();

    let state = TelemetryState::open(RecordStore::new(&path));
    assert_eq!(state.snapshot().await, TelemetryRecord::default());

    state.merge(&partial(json!({"spo2": 93}))).await.unwrap();
    assert_eq!(mirror(&dir).number("spo2"), Some(93.0));
}

#[tokio::test]
async fn given_merge_now_then_liveness_reports_connected() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);
    assert_eq!(
        ConnectionStatus::evaluate(&state.snapshot().await, Utc::now(), DEFAULT_CONNECTED_THRESHOLD),
        ConnectionStatus::Disconnected
    );

    let merged = state.merge(&partial(json!({"heart_rate": 60}))).await.unwrap();

    assert_eq!(
        ConnectionStatus::evaluate(&merged, Utc::now(), DEFAULT_CONNECTED_THRESHOLD),
        ConnectionStatus::Connected
    );
}

#[tokio::test]
async fn given_out_of_order_receipt_times_then_last_update_time_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);
    let later = Utc.timestamp_millis_opt(1_700_000_020_000).unwrap();
    let earlier = Utc.timestamp_millis_opt(1_700_000_010_000).unwrap();

    state
        .merge_at(&partial(json!({"heart_rate": 61})), later)
        .await
        .unwrap();
    let merged = state
        .merge_at(&partial(json!({"heart_rate": 62})), earlier)
        .await
        .unwrap();

    assert_eq!(merged.number("heart_rate"), Some(62.0));
    assert_eq!(merged.last_update_time(), Some(later));
}

#[tokio::test]
async fn given_future_stored_time_when_merged_then_stamp_is_now_and_liveness_goes_stale() {
    let dir = TempDir::new().unwrap();
    let future = Utc::now() + chrono::Duration::hours(1);
    fs::write(
        dir.path().join("data.json"),
        json!({
            "heart_rate": 60, "spo2": 97, "temperature": 36.5, "latitude": 0, "longitude": 0,
            "last_update_time": future.timestamp_millis() as f64 / 1000.0
        })
        .to_string(),
    )
    .unwrap();
    let state = open_state(&dir);

    let before = Utc::now() - chrono::Duration::milliseconds(1);
    let merged = state.merge(&partial(json!({"heart_rate": 70}))).await.unwrap();
    let after = Utc::now() + chrono::Duration::milliseconds(1);

    let stamped = merged.last_update_time().unwrap();
    assert!(stamped >= before && stamped <= after, "stamp {} not now", stamped);
    assert_eq!(mirror(&dir).last_update_time(), Some(stamped));
    assert!(!connected(&merged, after + chrono::Duration::minutes(30)));
    assert!(!connected_within(
        &merged,
        stamped + chrono::Duration::seconds(10),
        Duration::from_secs(5)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_merge_dropped_mid_write_then_mirror_still_follows_lock_order() {
    let dir = TempDir::new().unwrap();
    let state = open_state(&dir);

    // Poll the first merge once so it takes the lock and starts writing, then drop it.
    let first = partial(json!({"heart_rate": 90}));
    tokio::select! {
        biased;
        _ = state.merge(&first) => {}
        _ = tokio::task::yield_now() => {}
    }
    let merged = state.merge(&partial(json!({"spo2": 91}))).await.unwrap();

    assert_eq!(merged.number("spo2"), Some(91.0));
    assert_eq!(mirror(&dir), merged);
    assert_eq!(state.snapshot().await, merged);
}
