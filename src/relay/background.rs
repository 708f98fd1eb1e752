//! Background tasks for cache sweeping and transfer progress reporting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cache::CacheStore;
use crate::types::{Event, JobId, TransferPhase};

use super::MediaRelay;

/// Parameters for spawning a transfer progress reporter
pub(crate) struct TransferReporterParams {
    /// Relay handle for progress writes and event emission
    pub relay: MediaRelay,
    /// Job being transferred
    pub job_id: JobId,
    /// Which direction the bytes are moving
    pub phase: TransferPhase,
    /// Atomic counter the transfer callback bumps as bytes move
    pub bytes_done: Arc<AtomicU64>,
    /// Total expected bytes (0 while unknown)
    pub bytes_total: Arc<AtomicU64>,
    /// Token that stops the reporter
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a background task that periodically samples transfer counters,
/// writes them through the progress tracker, and emits progress events.
pub(crate) fn spawn_transfer_reporter(
    params: TransferReporterParams,
) -> tokio::task::JoinHandle<()> {
    let TransferReporterParams {
        relay,
        job_id,
        phase,
        bytes_done,
        bytes_total,
        cancel_token,
    } = params;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(relay.config.progress.min_update_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let done = bytes_done.load(Ordering::Relaxed);
                    let total = bytes_total.load(Ordering::Relaxed);
                    if done == 0 && total == 0 {
                        // Nothing has moved yet; stay quiet
                        continue;
                    }
                    let total = (total > 0).then_some(total);

                    relay.progress.update(&job_id, phase, done, total).await;
                    let event = match phase {
                        TransferPhase::Download => Event::DownloadProgress {
                            job_id: job_id.clone(),
                            bytes_done: done,
                            bytes_total: total,
                        },
                        TransferPhase::Upload => Event::UploadProgress {
                            job_id: job_id.clone(),
                            bytes_done: done,
                            bytes_total: total,
                        },
                    };
                    relay.emit_event(event);
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}

/// Spawn a background task that periodically reclaims expired cache entries.
///
/// Reads already drop expired entries lazily; the sweep keeps memory bounded
/// for keys nothing reads again.
pub(crate) fn spawn_cache_sweeper(
    cache: CacheStore,
    sweep_interval: Duration,
    cancel_token: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh relay does
        // not sweep an empty cache
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = cache.sweep().await;
                    if removed > 0 {
                        tracing::debug!(removed, "Cache sweep reclaimed expired entries");
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
