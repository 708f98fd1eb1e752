use crate::error::Error;
use crate::relay::test_helpers::{MockEngine, create_test_relay, request};
use crate::types::{Event, JobOutcome};
use std::time::Duration;

#[tokio::test]
async fn test_shutdown_with_idle_relay_emits_shutdown_event() {
    let t = create_test_relay(MockEngine::ok(64), |_| {}).await;
    let mut rx = t.relay.subscribe();

    t.relay.shutdown().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("shutdown event expected")
        .unwrap();
    assert!(matches!(event, Event::Shutdown));
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_jobs_and_settles_them() {
    let engine = MockEngine::ok(4096).with_fetch_delay(Duration::from_secs(10));
    let t = create_test_relay(engine, |config| {
        config.timeouts.shutdown = Duration::from_secs(5);
    })
    .await;

    let id = t
        .relay
        .submit(request(1, "https://example.com/endless"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    t.relay.shutdown().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "shutdown must not wait out the whole transfer"
    );

    // The cancelled job settled through the normal path
    let records = t.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, id);
    assert_eq!(records[0].outcome, JobOutcome::Cancelled);
    assert!(t.relay.active_jobs().await.is_empty());

    let stats = t.relay.stats().await;
    assert_eq!(stats.cancelled, 1);
    assert_eq!(
        stats.available_download_slots,
        t.relay.get_config().capacity.max_concurrent_downloads
    );
}

#[tokio::test]
async fn test_submissions_during_and_after_shutdown_are_refused() {
    let t = create_test_relay(MockEngine::ok(64), |_| {}).await;

    t.relay.shutdown().await.unwrap();

    for _ in 0..3 {
        let err = t
            .relay
            .submit(request(1, "https://example.com/late"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
    }
}

#[tokio::test]
async fn test_startup_sweep_removes_stale_job_directories() {
    let t = create_test_relay(MockEngine::ok(64), |config| {
        // Plant a leftover from a "previous run" before the relay starts
        let stale = config.temp.temp_root.join("job-stale-0001");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("artifact.bin"), b"leftover").unwrap();
        config.temp.sweep_on_start = true;
        config.temp.orphan_grace = Duration::ZERO;
    })
    .await;

    let root = t.relay.get_config().temp_root().to_path_buf();
    assert!(
        !root.join("job-stale-0001").exists(),
        "stale directory swept on startup"
    );
}

#[tokio::test]
async fn test_startup_sweep_respects_the_grace_period() {
    let t = create_test_relay(MockEngine::ok(64), |config| {
        let fresh = config.temp.temp_root.join("job-fresh-0001");
        std::fs::create_dir_all(&fresh).unwrap();
        config.temp.sweep_on_start = true;
        config.temp.orphan_grace = Duration::from_secs(3600);
    })
    .await;

    let root = t.relay.get_config().temp_root().to_path_buf();
    assert!(
        root.join("job-fresh-0001").exists(),
        "directories younger than the grace period survive"
    );
}
