//! Store tests (in-memory database, no disk I/O).

use chrono::{Duration, Utc};
use serde_json::json;

use super::db::open_memory;
use crate::job::{JobRecord, JobStatus};

fn record(lane: usize) -> JobRecord {
    JobRecord::new(json!({"kind": "noop"}), lane, 10_000)
}

#[tokio::test]
async fn upsert_then_get_roundtrip() {
    let store = open_memory().await.unwrap();
    let mut job = JobRecord::new(json!({"file": "a.bin", "bytes": 42}), 3, 7_500);
    store.upsert(&job).await.unwrap();

    let got = store.get(job.id).await.unwrap().expect("row exists");
    assert_eq!(got.id, job.id);
    assert_eq!(got.payload, job.payload);
    assert_eq!(got.status, JobStatus::Pending);
    assert_eq!(got.lane_index, 3);
    assert_eq!(got.timeout_ms, 7_500);
    assert_eq!(got.created_at.timestamp_millis(), job.created_at.timestamp_millis());
    assert!(got.started_at.is_none());
    assert!(got.error.is_none());

    // Second upsert updates lifecycle columns in place.
    job.status = JobStatus::Failed;
    job.completed_at = Some(Utc::now());
    job.error = Some("boom".into());
    store.upsert(&job).await.unwrap();

    let got = store.get(job.id).await.unwrap().expect("row exists");
    assert_eq!(got.status, JobStatus::Failed);
    assert_eq!(got.error.as_deref(), Some("boom"));
    assert!(got.completed_at.is_some());
}

#[tokio::test]
async fn batch_upsert_is_atomic_and_updates() {
    let store = open_memory().await.unwrap();
    let a = record(0);
    let b = record(1);
    store.batch_upsert(&[a.clone(), b.clone()]).await.unwrap();
    assert_eq!(store.list_all().await.unwrap().len(), 2);

    // Mixed insert + update in one batch.
    let mut a2 = a.clone();
    a2.status = JobStatus::Running;
    a2.started_at = Some(Utc::now());
    let c = record(2);
    store.batch_upsert(&[a2, c]).await.unwrap();

    let rows = store.list_all().await.unwrap();
    assert_eq!(rows.len(), 3);
    let got_a = store.get(a.id).await.unwrap().unwrap();
    assert_eq!(got_a.status, JobStatus::Running);
}

#[tokio::test]
async fn find_unfinished_skips_terminal_rows() {
    let store = open_memory().await.unwrap();
    let pending = record(0);
    let mut running = record(1);
    running.status = JobStatus::Running;
    running.started_at = Some(Utc::now());
    let mut done = record(2);
    done.status = JobStatus::Completed;
    done.completed_at = Some(Utc::now());
    let mut timed_out = record(3);
    timed_out.status = JobStatus::TimedOut;
    timed_out.completed_at = Some(Utc::now());

    store
        .batch_upsert(&[pending.clone(), running.clone(), done, timed_out])
        .await
        .unwrap();

    let unfinished = store.find_unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 2);
    let ids: Vec<_> = unfinished.iter().map(|j| j.id).collect();
    assert!(ids.contains(&pending.id));
    assert!(ids.contains(&running.id));
}

#[tokio::test]
async fn delete_terminal_before_respects_cutoff_and_status() {
    let store = open_memory().await.unwrap();

    let mut old_done = record(0);
    old_done.status = JobStatus::Completed;
    old_done.completed_at = Some(Utc::now() - Duration::days(30));

    let mut recent_done = record(0);
    recent_done.status = JobStatus::Completed;
    recent_done.completed_at = Some(Utc::now());

    // Pathological row: old timestamp but not terminal. Must survive.
    let mut old_pending = record(0);
    old_pending.created_at = Utc::now() - Duration::days(30);

    store
        .batch_upsert(&[old_done.clone(), recent_done.clone(), old_pending.clone()])
        .await
        .unwrap();

    let removed = store
        .delete_terminal_before(Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    assert!(store.get(old_done.id).await.unwrap().is_none());
    assert!(store.get(recent_done.id).await.unwrap().is_some());
    assert!(store.get(old_pending.id).await.unwrap().is_some());
}
