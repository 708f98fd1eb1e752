//! Wait-and-assert helpers for driving jobs to their terminal events

use std::path::Path;
use std::time::Duration;

use media_relay::{Event, JobId, MediaRelay};
use tokio::sync::broadcast;

/// Terminal outcome observed on the event stream
#[derive(Debug)]
pub enum WaitResult {
    /// Job delivered successfully
    Completed,
    /// Job was refused before transfer work, with its failure code
    Rejected(String),
    /// Job failed during processing, with its failure code
    Failed(String),
    /// Job was cancelled
    Cancelled,
    /// No terminal event arrived in time
    Timeout,
    /// Event channel closed unexpectedly
    ChannelClosed,
}

/// Drain `events` until the job reaches a terminal event or `timeout`
/// passes.
///
/// Subscribe before submitting, or the terminal event may already have
/// been broadcast by the time this starts listening.
pub async fn wait_for_outcome(
    events: &mut broadcast::Receiver<Event>,
    id: &JobId,
    timeout: Duration,
) -> WaitResult {
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::JobCompleted { job_id, .. }) if job_id == *id => {
                    return WaitResult::Completed;
                }
                Ok(Event::JobRejected { job_id, code, .. }) if job_id == *id => {
                    return WaitResult::Rejected(code);
                }
                Ok(Event::JobFailed { job_id, code, .. }) if job_id == *id => {
                    return WaitResult::Failed(code);
                }
                Ok(Event::JobCancelled { job_id }) if job_id == *id => {
                    return WaitResult::Cancelled;
                }
                Ok(_) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    outcome.unwrap_or(WaitResult::Timeout)
}

/// Panic unless the job completes within `timeout`.
pub async fn assert_completed(
    events: &mut broadcast::Receiver<Event>,
    id: &JobId,
    timeout: Duration,
) {
    match wait_for_outcome(events, id, timeout).await {
        WaitResult::Completed => {}
        other => panic!("expected job {id} to complete, got {other:?}"),
    }
}

/// Panic unless the job is rejected with `expected_code` within `timeout`.
pub async fn assert_rejected_with(
    events: &mut broadcast::Receiver<Event>,
    id: &JobId,
    expected_code: &str,
    timeout: Duration,
) {
    match wait_for_outcome(events, id, timeout).await {
        WaitResult::Rejected(code) if code == expected_code => {}
        other => panic!("expected job {id} rejected with '{expected_code}', got {other:?}"),
    }
}

/// Panic unless the job fails with `expected_code` within `timeout`.
pub async fn assert_failed_with(
    events: &mut broadcast::Receiver<Event>,
    id: &JobId,
    expected_code: &str,
    timeout: Duration,
) {
    match wait_for_outcome(events, id, timeout).await {
        WaitResult::Failed(code) if code == expected_code => {}
        other => panic!("expected job {id} to fail with '{expected_code}', got {other:?}"),
    }
}

/// Poll until the job leaves the active set, panicking after `timeout`.
///
/// Event-based waits can race the job's final bookkeeping; this only
/// returns once the job is fully unregistered, so stats and history are
/// settled when it does.
pub async fn settle(relay: &MediaRelay, id: &JobId, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let active = relay.active_jobs().await;
        if !active.iter().any(|(active_id, _)| active_id == id) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} still active after {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Count regular files anywhere under the relay temp root.
pub fn temp_file_count(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}
