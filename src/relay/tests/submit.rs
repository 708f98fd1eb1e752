use crate::config::RateWindowConfig;
use crate::error::{Error, JobFailure};
use crate::relay::test_helpers::{MockEngine, create_test_relay, request, wait_until_settled};
use crate::types::{JobOutcome, RateScope, UserId};
use std::time::Duration;

// --- submit() acceptance ---

#[tokio::test]
async fn test_submit_accepts_and_completes_a_job() {
    let t = create_test_relay(MockEngine::ok(1024), |_| {}).await;

    let id = t
        .relay
        .submit(request(1, "https://example.com/watch?v=1"))
        .await
        .unwrap();
    wait_until_settled(&t.relay, &id).await;

    let stats = t.relay.stats().await;
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);

    let records = t.history.records();
    assert_eq!(records.len(), 1, "exactly one record per job");
    assert_eq!(records[0].job_id, id);
    assert_eq!(records[0].outcome, JobOutcome::Completed);
    assert_eq!(records[0].final_size_bytes, Some(1024));
    assert!(records[0].delivery_id.is_some());
    assert!(records[0].failure_code.is_none());
}

#[tokio::test]
async fn test_submit_rejects_unparseable_url_without_creating_a_job() {
    let t = create_test_relay(MockEngine::ok(64), |_| {}).await;

    let err = t.relay.submit(request(1, "not a url")).await.unwrap_err();
    match err {
        Error::Job(JobFailure::UnsupportedSource { url }) => assert_eq!(url, "not a url"),
        other => panic!("expected UnsupportedSource, got {other:?}"),
    }

    let stats = t.relay.stats().await;
    assert_eq!(stats.submitted, 0, "a refused URL never becomes a job");
    assert!(t.relay.active_jobs().await.is_empty());
    assert!(t.history.is_empty(), "no record for a request that never ran");
}

#[tokio::test]
async fn test_submit_rejects_non_http_schemes() {
    let t = create_test_relay(MockEngine::ok(64), |_| {}).await;

    let err = t
        .relay
        .submit(request(1, "ftp://example.com/file.bin"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Job(JobFailure::UnsupportedSource { .. })
    ));
}

// --- rate limiting at the submission edge ---

#[tokio::test]
async fn test_submissions_over_the_limit_are_rejected_with_retry_hint() {
    let t = create_test_relay(MockEngine::ok(64), |config| {
        config.rate_limits.enabled = true;
        config.rate_limits.penalties_enabled = false;
        config.rate_limits.global =
            RateWindowConfig::new(2, Duration::from_secs(60), Duration::ZERO);
    })
    .await;

    let first = t
        .relay
        .submit(request(1, "https://example.com/a"))
        .await
        .unwrap();
    let second = t
        .relay
        .submit(request(1, "https://example.com/b"))
        .await
        .unwrap();

    let err = t
        .relay
        .submit(request(1, "https://example.com/c"))
        .await
        .unwrap_err();
    match err {
        Error::Job(JobFailure::RateLimited { scope, retry_after }) => {
            assert_eq!(scope, RateScope::Global);
            assert!(retry_after > Duration::ZERO);
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    wait_until_settled(&t.relay, &first).await;
    wait_until_settled(&t.relay, &second).await;

    let stats = t.relay.stats().await;
    assert_eq!(stats.completed, 2, "jobs inside the limit still run");
    assert_eq!(stats.rejected, 1);

    // The rejection is recorded alongside the completions
    let rejected: Vec<_> = t
        .history
        .records()
        .into_iter()
        .filter(|r| r.outcome == JobOutcome::Rejected)
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].failure_code.as_deref(), Some("rate_limited"));
}

#[tokio::test]
async fn test_exempt_user_bypasses_rate_limits_at_submit() {
    let t = create_test_relay(MockEngine::ok(64), |config| {
        config.rate_limits.enabled = true;
        config.rate_limits.exempt_users = vec![UserId::new(99)];
        config.rate_limits.global =
            RateWindowConfig::new(1, Duration::from_secs(60), Duration::ZERO);
    })
    .await;

    for n in 0..4 {
        let id = t
            .relay
            .submit(request(99, &format!("https://example.com/v{n}")))
            .await
            .unwrap();
        wait_until_settled(&t.relay, &id).await;
    }
    assert_eq!(t.relay.stats().await.completed, 4);
}

// --- shutdown gate ---

#[tokio::test]
async fn test_submit_after_shutdown_is_refused() {
    let t = create_test_relay(MockEngine::ok(64), |_| {}).await;

    t.relay.shutdown().await.unwrap();

    let err = t
        .relay
        .submit(request(1, "https://example.com/late"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert_eq!(t.relay.stats().await.submitted, 0);
}
