//! Persistence tests — playtime accounting across simulated process
//! restarts, and the crash-safety of the temp-file-then-rename discipline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use warden_monitor::{PlaytimeStore, RecoveryPolicy, RosterTracker, StoreHandle};
use warden_protocol::{GameKind, ServerProfile};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn profile() -> Arc<ServerProfile> {
    Arc::new(ServerProfile {
        name: "pal-eu-1".into(),
        kind: GameKind::Palworld,
        host: "127.0.0.1".into(),
        port: 25575,
        password: "x".into(),
    })
}

/// One monitor "run": tracker + store task against the given stats file.
async fn run_session(
    stats: &std::path::Path,
    snapshots: Vec<(BTreeSet<String>, DateTime<Utc>)>,
) {
    let store = PlaytimeStore::load(stats.to_path_buf(), RecoveryPolicy::default())
        .await
        .unwrap();
    let (handle, join): (StoreHandle, _) = store.spawn(Duration::from_secs(3600));

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let mut tracker = RosterTracker::new(profile(), events_tx, handle.clone());

    for (roster, when) in snapshots {
        tracker.apply(roster, when);
    }

    // Dropping every handle ends the store task, which flushes on exit.
    drop(tracker);
    drop(handle);
    join.await.unwrap();
}

#[tokio::test]
async fn totals_accumulate_across_restarts() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let stats = dir.path().join("player_stats.json");

    // First run: Alice plays 125 seconds.
    run_session(
        &stats,
        vec![(set(&["Alice"]), at(0)), (set(&[]), at(125))],
    )
    .await;

    // Second run, after a "restart": another 300 seconds.
    run_session(
        &stats,
        vec![(set(&["Alice"]), at(200)), (set(&[]), at(500))],
    )
    .await;

    let store = PlaytimeStore::load(stats, RecoveryPolicy::Fail).await.unwrap();
    let record = store.get("pal-eu-1:Alice").unwrap();
    assert_eq!(record.total_playtime_seconds, 425);
    // First-join survives both the flush roundtrip and the later session.
    assert_eq!(record.first_join, at(0));
}

#[tokio::test]
async fn open_sessions_survive_shutdown_via_drain() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let stats = dir.path().join("player_stats.json");

    {
        let store = PlaytimeStore::load(stats.clone(), RecoveryPolicy::default())
            .await
            .unwrap();
        let (handle, join) = store.spawn(Duration::from_secs(3600));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut tracker = RosterTracker::new(profile(), events_tx, handle.clone());

        tracker.apply(set(&["Bob"]), at(0));
        // Shutdown while Bob is still online: the open session is folded in.
        tracker.drain(at(90));

        drop(tracker);
        drop(handle);
        join.await.unwrap();
    }

    let store = PlaytimeStore::load(stats, RecoveryPolicy::Fail).await.unwrap();
    assert_eq!(store.get("pal-eu-1:Bob").unwrap().total_playtime_seconds, 90);
}

#[tokio::test]
async fn stale_temp_file_from_a_crash_is_harmless() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let stats = dir.path().join("player_stats.json");

    run_session(&stats, vec![(set(&["Alice"]), at(0)), (set(&[]), at(60))]).await;

    // A crash between the temp write and the rename leaves a .tmp behind;
    // the real file stays valid and the next run overwrites the leftover.
    std::fs::write(stats.with_extension("tmp"), "{ half-written garb").unwrap();

    run_session(&stats, vec![(set(&["Alice"]), at(100)), (set(&[]), at(160))]).await;

    let store = PlaytimeStore::load(stats, RecoveryPolicy::Fail).await.unwrap();
    assert_eq!(
        store.get("pal-eu-1:Alice").unwrap().total_playtime_seconds,
        120
    );
}

#[tokio::test]
async fn mapping_file_is_plain_keyed_json() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let stats = dir.path().join("player_stats.json");

    run_session(&stats, vec![(set(&["Alice"]), at(10)), (set(&[]), at(135))]).await;

    let raw = std::fs::read_to_string(&stats).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let record = &parsed["pal-eu-1:Alice"];
    assert_eq!(record["total_playtime_seconds"], 125);
    assert!(record["first_join"].is_string());
}
