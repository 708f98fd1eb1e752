//! Job finalization — outcome mapping, cleanup, and record writing.

use std::sync::atomic::Ordering;

use crate::error::JobFailure;
use crate::types::{Event, JobOutcome, JobRecord, JobState, ProgressStatus, TransferPhase};

use super::context::{JobResources, JobTaskContext};
use super::orchestration::JobSuccess;

/// Settle a finished job, whatever happened to it.
///
/// Runs for every job that was spawned, success or not:
/// 1. Returns any held slots so waiters unblock immediately
/// 2. Writes terminal progress for phases that reported
/// 3. Removes the temp artifact
/// 4. Drops cached probe metadata after source-side failures
/// 5. Maps the result to an outcome, bumping the matching counter
/// 6. Emits the terminal event and writes exactly one job record
/// 7. Unregisters the job
pub(super) async fn finalize_job(
    ctx: JobTaskContext,
    mut resources: JobResources,
    result: Result<JobSuccess, JobFailure>,
) {
    // 1. Slots first; dropping the permits frees the pools
    resources.download_slot = None;
    resources.upload_slot = None;

    // 2. Terminal progress for any phase still tracked
    let progress_status = match &result {
        Ok(_) => ProgressStatus::Completed,
        Err(JobFailure::Cancelled) => ProgressStatus::Cancelled,
        Err(_) => ProgressStatus::Failed,
    };
    if resources.download_tracked {
        ctx.relay
            .progress
            .finish(&ctx.id, TransferPhase::Download, progress_status)
            .await;
    }
    if resources.upload_tracked {
        ctx.relay
            .progress
            .finish(&ctx.id, TransferPhase::Upload, progress_status)
            .await;
    }

    // 3. The temp artifact is removed no matter how the job ended
    if let Some(artifact) = resources.artifact.take() {
        if let Err(e) = artifact.cleanup().await {
            tracing::warn!(job_id = %ctx.id, error = %e, "Failed to remove job temp directory");
        }
    }

    // 4. Stale probe metadata would make the next attempt repeat a
    //    source-side failure, so it is dropped
    if let Err(JobFailure::Network { .. } | JobFailure::Extraction { .. }) = &result {
        let key = crate::engine::probe_cache_key(&ctx.source_url);
        ctx.relay.cache.invalidate(&key).await;
    }

    // 5 + 6. Outcome, counter, terminal event, record
    let finished_at = chrono::Utc::now();
    let duration_ms = ctx.started.elapsed().as_millis() as u64;
    let counters = &ctx.relay.counters;

    let (outcome, final_state) = match &result {
        Ok(success) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                job_id = %ctx.id,
                size_bytes = success.size_bytes,
                transport = %success.transport,
                duration_ms,
                "Job completed"
            );
            ctx.emit(Event::JobCompleted {
                job_id: ctx.id.clone(),
                size_bytes: success.size_bytes,
                transport: success.transport,
                delivery_id: success.delivery_id.to_string(),
            });
            (JobOutcome::Completed, JobState::Completed)
        }
        Err(JobFailure::Cancelled) => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::info!(job_id = %ctx.id, duration_ms, "Job cancelled");
            ctx.emit(Event::JobCancelled {
                job_id: ctx.id.clone(),
            });
            (JobOutcome::Cancelled, JobState::Cancelled)
        }
        Err(failure) if failure.is_rejection() => {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                job_id = %ctx.id,
                code = failure.code(),
                reason = %failure.user_message(),
                "Job rejected"
            );
            ctx.emit(Event::JobRejected {
                job_id: ctx.id.clone(),
                code: failure.code().to_string(),
                reason: failure.user_message(),
                retry_after_secs: match failure {
                    JobFailure::RateLimited { retry_after, .. } => {
                        Some(crate::rate_limiter::ceil_secs(*retry_after))
                    }
                    _ => None,
                },
            });
            (JobOutcome::Rejected, JobState::Rejected)
        }
        Err(failure) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                job_id = %ctx.id,
                code = failure.code(),
                error = %failure,
                duration_ms,
                "Job failed"
            );
            ctx.emit(Event::JobFailed {
                job_id: ctx.id.clone(),
                code: failure.code().to_string(),
                reason: failure.user_message(),
            });
            (JobOutcome::Failed, JobState::Failed)
        }
    };
    ctx.set_state(final_state).await;

    let record = match &result {
        Ok(success) => JobRecord {
            job_id: ctx.id.clone(),
            user: ctx.request.user,
            source_url: ctx.source_url.to_string(),
            outcome,
            failure_code: None,
            failure_reason: None,
            final_size_bytes: Some(success.size_bytes),
            checksum_sha256: success.checksum_sha256.clone(),
            transport: Some(success.transport),
            delivery_id: Some(success.delivery_id.to_string()),
            created_at: ctx.created_at,
            finished_at,
            duration_ms,
        },
        Err(failure) => JobRecord {
            job_id: ctx.id.clone(),
            user: ctx.request.user,
            source_url: ctx.source_url.to_string(),
            outcome,
            failure_code: Some(failure.code().to_string()),
            failure_reason: Some(failure.user_message()),
            final_size_bytes: None,
            checksum_sha256: None,
            transport: None,
            delivery_id: None,
            created_at: ctx.created_at,
            finished_at,
            duration_ms,
        },
    };
    if let Err(e) = ctx.relay.collaborators.history.record(&record).await {
        tracing::warn!(job_id = %ctx.id, error = %e, "Failed to record finished job");
    }

    // 7. Unregister last so cancel() can reach the job until it is settled
    ctx.remove_from_active().await;
}
