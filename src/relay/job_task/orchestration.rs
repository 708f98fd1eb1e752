//! Job orchestration — the phase sequence for a single job.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::engine::ProgressFn;
use crate::error::{Error, JobFailure};
use crate::retry::add_jitter;
use crate::transport::UploadMetadata;
use crate::types::{
    DeliveryId, Event, JobState, MediaFormat, ProgressStatus, ResourceClass, TransferPhase,
    TransportKind,
};

use super::super::background::{TransferReporterParams, spawn_transfer_reporter};
use super::context::{JobResources, JobTaskContext};
use super::finalization::finalize_job;

/// What a successful pipeline run produced
pub(super) struct JobSuccess {
    pub(super) size_bytes: u64,
    pub(super) transport: TransportKind,
    pub(super) delivery_id: DeliveryId,
    pub(super) checksum_sha256: Option<String>,
}

/// Core job task -- runs the phase sequence and always finalizes.
///
/// Phases:
/// 1. Acquire a download slot
/// 2. Probe the source (cached), pick a format, apply estimate checks
/// 3. Fetch into a job-scoped temp file, retrying once on network failure
/// 4. Release the download slot, then verify the artifact on the
///    processing pool
/// 5. Acquire an upload slot and select a transport from the actual size
/// 6. Deliver and collect the destination's id
///
/// Finalization runs whatever the outcome: slots are returned, the temp
/// artifact is removed, and exactly one record and terminal event go out.
pub(crate) async fn run_job_task(ctx: JobTaskContext) {
    let mut resources = JobResources::default();
    let result = run_phases(&ctx, &mut resources).await;
    finalize_job(ctx, resources, result).await;
}

async fn run_phases(
    ctx: &JobTaskContext,
    resources: &mut JobResources,
) -> Result<JobSuccess, JobFailure> {
    let timeouts = &ctx.relay.config.timeouts;

    // Phase 1: download slot
    let slot = ctx
        .relay
        .admission
        .acquire(
            ResourceClass::Download,
            timeouts.slot_acquire,
            &ctx.cancel_token,
        )
        .await?;
    resources.download_slot = Some(slot);
    ctx.set_state(JobState::AdmittedDownload).await;
    ctx.emit(Event::JobAdmitted {
        job_id: ctx.id.clone(),
        class: ResourceClass::Download,
    });

    // Phases 2-3: probe and fetch share one retry budget. On a transient
    // network failure the whole step runs again; a probe that already
    // succeeded is served from the cache, so the second pass reuses the
    // format picked the first time.
    let bytes_seen = Arc::new(AtomicU64::new(0));
    let total_seen = Arc::new(AtomicU64::new(0));
    let retry_cfg = &ctx.relay.config.retry;
    let mut retried = false;
    let fetched = loop {
        match extract_and_fetch(ctx, resources, &bytes_seen, &total_seen).await {
            Ok(bytes) => break bytes,
            Err(JobFailure::Network { message }) if !retried => {
                retried = true;
                let delay = if retry_cfg.jitter {
                    add_jitter(retry_cfg.initial_delay)
                } else {
                    retry_cfg.initial_delay
                };
                tracing::warn!(
                    job_id = %ctx.id,
                    error = %message,
                    delay_ms = delay.as_millis() as u64,
                    "Transient network failure, retrying transfer once"
                );
                tokio::select! {
                    _ = ctx.cancel_token.cancelled() => return Err(JobFailure::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(failure) => return Err(failure),
        }
    };
    ctx.relay
        .progress
        .update(&ctx.id, TransferPhase::Download, fetched, Some(fetched))
        .await;

    // Phase 4: free the download slot before anything else waits on capacity
    resources.download_slot = None;

    let (size_bytes, checksum_sha256) = verify_artifact(ctx, resources).await?;

    if resources.download_tracked {
        ctx.relay
            .progress
            .finish(&ctx.id, TransferPhase::Download, ProgressStatus::Completed)
            .await;
        resources.download_tracked = false;
    }
    ctx.set_state(JobState::Downloaded).await;
    ctx.emit(Event::DownloadFinished {
        job_id: ctx.id.clone(),
        size_bytes,
    });

    // Phase 5: upload admission, then selection from the size on disk
    let slot = ctx
        .relay
        .admission
        .acquire(
            ResourceClass::Upload,
            timeouts.slot_acquire,
            &ctx.cancel_token,
        )
        .await?;
    resources.upload_slot = Some(slot);
    ctx.set_state(JobState::AdmittedUpload).await;
    ctx.emit(Event::JobAdmitted {
        job_id: ctx.id.clone(),
        class: ResourceClass::Upload,
    });

    let transport = match ctx.relay.selector.select(size_bytes) {
        Ok(kind) => kind,
        Err(failure) => {
            // An oversize artifact must not pin an upload slot while the
            // rejection propagates
            resources.upload_slot = None;
            return Err(failure);
        }
    };
    ctx.set_state(JobState::TransportSelected).await;
    ctx.emit(Event::TransportSelected {
        job_id: ctx.id.clone(),
        transport,
    });

    // Phase 6: deliver
    ctx.set_state(JobState::Uploading).await;
    ctx.emit(Event::UploadStarted {
        job_id: ctx.id.clone(),
        transport,
    });
    let delivery_id = deliver_artifact(ctx, resources, size_bytes, transport).await?;
    if resources.upload_tracked {
        ctx.relay
            .progress
            .update(&ctx.id, TransferPhase::Upload, size_bytes, Some(size_bytes))
            .await;
        ctx.relay
            .progress
            .finish(&ctx.id, TransferPhase::Upload, ProgressStatus::Completed)
            .await;
        resources.upload_tracked = false;
    }

    Ok(JobSuccess {
        size_bytes,
        transport,
        delivery_id,
        checksum_sha256,
    })
}

/// One pass of the extraction+download step.
///
/// Probes (through the cache), applies estimate-based checks, allocates the
/// temp artifact on the first pass, and fetches. All waiting is bounded by
/// the phase timeouts and the job's cancellation token.
async fn extract_and_fetch(
    ctx: &JobTaskContext,
    resources: &mut JobResources,
    bytes_seen: &Arc<AtomicU64>,
    total_seen: &Arc<AtomicU64>,
) -> Result<u64, JobFailure> {
    let timeouts = &ctx.relay.config.timeouts;

    ctx.set_state(JobState::Extracting).await;
    ctx.emit(Event::ExtractionStarted {
        job_id: ctx.id.clone(),
    });

    let formats = probe_source(ctx).await?;
    let format = choose_format(ctx, &formats)?.clone();

    // A hopeless estimate is refused before any disk or network work. The
    // estimate is advisory; anything that slips past is caught again after
    // the download, when the true size is known.
    if let Some(estimate) = format.size_estimate {
        let ceiling = ctx.relay.selector.ceiling();
        if estimate > ceiling {
            return Err(JobFailure::TooLarge {
                size_bytes: estimate,
                limit_bytes: ceiling,
            });
        }
        total_seen.store(estimate, Ordering::Relaxed);
    }
    ensure_disk_space(ctx, format.size_estimate.unwrap_or(0)).map_err(JobFailure::from)?;

    // The temp directory survives a retry; only the first pass creates it
    let destination = match resources.artifact.as_ref() {
        Some(artifact) => artifact.path().to_path_buf(),
        None => {
            let artifact = ctx
                .relay
                .temp
                .allocate(&ctx.id)
                .await
                .map_err(JobFailure::from)?;
            let destination = artifact.path().to_path_buf();
            resources.artifact = Some(artifact);
            destination
        }
    };

    ctx.set_state(JobState::Downloading).await;
    ctx.emit(Event::DownloadStarted {
        job_id: ctx.id.clone(),
        format_id: format.format_id.clone(),
        size_estimate: format.size_estimate,
    });
    resources.download_tracked = true;

    // Reporter lives for this attempt only; the guard stops it on any exit
    let reporter_token = ctx.cancel_token.child_token();
    let _reporter = reporter_token.clone().drop_guard();
    spawn_transfer_reporter(TransferReporterParams {
        relay: ctx.relay.clone(),
        job_id: ctx.id.clone(),
        phase: TransferPhase::Download,
        bytes_done: bytes_seen.clone(),
        bytes_total: total_seen.clone(),
        cancel_token: reporter_token,
    });

    let progress: ProgressFn = {
        let bytes = bytes_seen.clone();
        let totals = total_seen.clone();
        Arc::new(move |done, total| {
            bytes.fetch_max(done, Ordering::Relaxed);
            if let Some(t) = total {
                totals.store(t, Ordering::Relaxed);
            }
        })
    };
    let engine = ctx.relay.collaborators.engine.clone();
    bounded(
        ctx,
        "download",
        timeouts.download,
        engine.fetch(&ctx.source_url, &format.format_id, &destination, progress),
    )
    .await
}

/// Probe the source, serving repeated submissions from the cache
async fn probe_source(ctx: &JobTaskContext) -> Result<Vec<MediaFormat>, JobFailure> {
    let key = crate::engine::probe_cache_key(&ctx.source_url);
    if let Some(formats) = ctx.relay.cache.get_json::<Vec<MediaFormat>>(&key).await {
        tracing::debug!(job_id = %ctx.id, "Probe metadata served from cache");
        return Ok(formats);
    }

    let engine = ctx.relay.collaborators.engine.clone();
    let formats = bounded(
        ctx,
        "extraction",
        ctx.relay.config.timeouts.extraction,
        engine.probe(&ctx.source_url),
    )
    .await?;

    if let Err(e) = ctx
        .relay
        .cache
        .set_json(&key, &formats, Some(ctx.relay.config.cache.metadata_ttl))
        .await
    {
        tracing::debug!(job_id = %ctx.id, error = %e, "Failed to cache probe metadata");
    }
    Ok(formats)
}

/// Pick the format to fetch: the requested id when present, otherwise the
/// first the source offers
fn choose_format<'a>(
    ctx: &JobTaskContext,
    formats: &'a [MediaFormat],
) -> Result<&'a MediaFormat, JobFailure> {
    if formats.is_empty() {
        return Err(JobFailure::Extraction {
            message: "source reported no downloadable formats".to_string(),
        });
    }
    match &ctx.request.format_id {
        Some(wanted) => formats
            .iter()
            .find(|f| &f.format_id == wanted)
            .ok_or_else(|| JobFailure::Extraction {
                message: format!("format '{wanted}' not offered by source"),
            }),
        None => Ok(&formats[0]),
    }
}

/// Refuse the job when staging it would drop free space below the floor
fn ensure_disk_space(ctx: &JobTaskContext, required: u64) -> crate::error::Result<()> {
    let Some(min_free) = ctx.relay.config.storage.min_free_bytes else {
        return Ok(());
    };
    let available = crate::utils::get_available_space(ctx.relay.temp.root())
        .map_err(|e| Error::DiskSpaceCheckFailed(e.to_string()))?;
    if available.saturating_sub(required) < min_free {
        tracing::warn!(
            job_id = %ctx.id,
            required,
            available,
            min_free,
            "Refusing job for insufficient disk space"
        );
        return Err(Error::Job(JobFailure::InsufficientStorage {
            required,
            available,
        }));
    }
    Ok(())
}

/// Size and optionally checksum the staged artifact, on the processing pool
async fn verify_artifact(
    ctx: &JobTaskContext,
    resources: &JobResources,
) -> Result<(u64, Option<String>), JobFailure> {
    let Some(artifact) = resources.artifact.as_ref() else {
        return Err(JobFailure::Internal {
            message: "artifact missing after download".to_string(),
        });
    };

    // Hashing large files is CPU and disk bound, so it queues on the
    // processing pool rather than holding a transfer slot
    let _processing = ctx
        .relay
        .admission
        .acquire(
            ResourceClass::Processing,
            ctx.relay.config.timeouts.slot_acquire,
            &ctx.cancel_token,
        )
        .await?;

    let size_bytes = artifact.finalize().await.map_err(JobFailure::from)?;
    if size_bytes == 0 {
        return Err(JobFailure::Extraction {
            message: "engine reported success but produced an empty file".to_string(),
        });
    }

    let checksum = if ctx.relay.config.storage.compute_checksum {
        Some(
            crate::utils::sha256_file(artifact.path())
                .await
                .map_err(JobFailure::from)?,
        )
    } else {
        None
    };
    Ok((size_bytes, checksum))
}

/// Send the artifact through the selected transport
async fn deliver_artifact(
    ctx: &JobTaskContext,
    resources: &mut JobResources,
    size_bytes: u64,
    transport: TransportKind,
) -> Result<DeliveryId, JobFailure> {
    let Some(artifact) = resources.artifact.as_ref() else {
        return Err(JobFailure::Internal {
            message: "artifact missing at delivery".to_string(),
        });
    };
    let path = artifact.path().to_path_buf();
    let metadata = UploadMetadata {
        job_id: ctx.id.clone(),
        user: ctx.request.user,
        file_name: delivery_file_name(ctx),
        size_bytes,
        source_url: ctx.source_url.to_string(),
    };
    let upload_timeout = ctx.relay.config.timeouts.upload;

    match transport {
        TransportKind::Small => {
            let small = ctx.relay.collaborators.small_transport.clone();
            bounded(ctx, "upload", upload_timeout, small.send(&path, &metadata)).await
        }
        TransportKind::Large => {
            // Only the large path streams, so only it gets a reporter
            resources.upload_tracked = true;
            let bytes_sent = Arc::new(AtomicU64::new(0));
            let bytes_total = Arc::new(AtomicU64::new(size_bytes));
            let reporter_token = ctx.cancel_token.child_token();
            let _reporter = reporter_token.clone().drop_guard();
            spawn_transfer_reporter(TransferReporterParams {
                relay: ctx.relay.clone(),
                job_id: ctx.id.clone(),
                phase: TransferPhase::Upload,
                bytes_done: bytes_sent.clone(),
                bytes_total,
                cancel_token: reporter_token,
            });

            let progress: ProgressFn = {
                let bytes = bytes_sent.clone();
                Arc::new(move |done, _total| {
                    bytes.fetch_max(done, Ordering::Relaxed);
                })
            };
            let large = ctx.relay.collaborators.large_transport.clone();
            bounded(
                ctx,
                "upload",
                upload_timeout,
                large.send(&path, &metadata, progress),
            )
            .await
        }
    }
}

/// File name presented at the destination
fn delivery_file_name(ctx: &JobTaskContext) -> String {
    match &ctx.request.file_name {
        Some(name) => crate::utils::sanitize_component(name),
        None => ctx.id.to_string(),
    }
}

/// Run `work` under the phase timeout, aborting early on cancellation
async fn bounded<T>(
    ctx: &JobTaskContext,
    phase: &str,
    limit: Duration,
    work: impl std::future::Future<Output = crate::error::Result<T>>,
) -> Result<T, JobFailure> {
    tokio::select! {
        _ = ctx.cancel_token.cancelled() => Err(JobFailure::Cancelled),
        result = tokio::time::timeout(limit, work) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(JobFailure::from(e)),
            Err(_) => Err(JobFailure::Timeout {
                phase: phase.to_string(),
                elapsed: limit,
            }),
        },
    }
}
