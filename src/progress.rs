//! Transfer progress tracking
//!
//! Producers report byte counts fire-and-forget; pollers read point-in-time
//! snapshots. Reported progress is monotonic per transfer (out-of-order
//! reports can never move it backwards), persisted snapshots are throttled
//! to one per configured interval, and snapshots expire on their own so a
//! crashed job leaves nothing stale behind.

use crate::cache::CacheStore;
use crate::config::ProgressConfig;
use crate::types::{JobId, ProgressSnapshot, ProgressStatus, TransferPhase};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Minimum elapsed time before speed and ETA are derived; earlier samples
/// produce absurd rates
const SPEED_WARMUP_SECS: f64 = 0.05;

struct TrackState {
    /// High-water mark; reports below this are folded away
    bytes_done: u64,
    bytes_total: Option<u64>,
    started: Instant,
    last_write: Option<Instant>,
}

/// Cloneable tracker over the shared cache store
#[derive(Clone)]
pub struct ProgressTracker {
    cache: CacheStore,
    config: ProgressConfig,
    transfers: Arc<Mutex<HashMap<(JobId, TransferPhase), TrackState>>>,
}

impl ProgressTracker {
    /// Creates a tracker writing snapshots into `cache`
    pub fn new(cache: CacheStore, config: ProgressConfig) -> Self {
        Self {
            cache,
            config,
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cache key under which a transfer's snapshot is stored
    pub fn cache_key(job_id: &JobId, phase: TransferPhase) -> String {
        format!("progress:{phase}:{job_id}")
    }

    /// Reports transfer progress
    ///
    /// Never fails and never blocks on anything but the internal map lock; a
    /// report below the current high-water mark is kept out of the snapshot,
    /// and reports arriving faster than the configured interval are folded
    /// into the next persisted one.
    pub async fn update(
        &self,
        job_id: &JobId,
        phase: TransferPhase,
        bytes_done: u64,
        bytes_total: Option<u64>,
    ) {
        let now = Instant::now();
        let mut transfers = self.transfers.lock().await;
        let state = transfers
            .entry((job_id.clone(), phase))
            .or_insert_with(|| TrackState {
                bytes_done: 0,
                bytes_total: None,
                started: now,
                last_write: None,
            });

        state.bytes_done = state.bytes_done.max(bytes_done);
        if bytes_total.is_some() {
            state.bytes_total = bytes_total;
        }

        let due = match state.last_write {
            None => true,
            Some(last) => now.duration_since(last) >= self.config.min_update_interval,
        };
        if !due {
            return;
        }
        state.last_write = Some(now);

        let snapshot = build_snapshot(job_id, phase, state, ProgressStatus::Active);
        drop(transfers);
        self.write(snapshot).await;
    }

    /// Reads the current snapshot for one transfer, if it is still live
    pub async fn read(&self, job_id: &JobId, phase: TransferPhase) -> Option<ProgressSnapshot> {
        self.cache.get_json(&Self::cache_key(job_id, phase)).await
    }

    /// Writes the terminal snapshot for a transfer, bypassing the throttle,
    /// and forgets its tracking state
    pub async fn finish(&self, job_id: &JobId, phase: TransferPhase, status: ProgressStatus) {
        let mut transfers = self.transfers.lock().await;
        let snapshot = match transfers.remove(&(job_id.clone(), phase)) {
            Some(state) => build_snapshot(job_id, phase, &state, status),
            None => ProgressSnapshot {
                job_id: job_id.clone(),
                phase,
                bytes_done: 0,
                bytes_total: None,
                percent: None,
                speed_bps: None,
                eta_secs: None,
                status,
                updated_at: Utc::now(),
            },
        };
        drop(transfers);
        self.write(snapshot).await;
    }

    async fn write(&self, snapshot: ProgressSnapshot) {
        let key = Self::cache_key(&snapshot.job_id, snapshot.phase);
        if let Err(e) = self
            .cache
            .set_json(key, &snapshot, Some(self.config.ttl))
            .await
        {
            tracing::debug!(job_id = %snapshot.job_id, error = %e, "Progress snapshot not persisted");
        }
    }
}

fn build_snapshot(
    job_id: &JobId,
    phase: TransferPhase,
    state: &TrackState,
    status: ProgressStatus,
) -> ProgressSnapshot {
    let percent = state.bytes_total.and_then(|total| {
        (total > 0).then(|| ((state.bytes_done as f64 / total as f64) * 100.0).min(100.0) as f32)
    });
    let elapsed = state.started.elapsed().as_secs_f64();
    let speed_bps = (elapsed > SPEED_WARMUP_SECS && state.bytes_done > 0)
        .then(|| (state.bytes_done as f64 / elapsed) as u64);
    let eta_secs = match (state.bytes_total, speed_bps) {
        (Some(total), Some(speed)) if speed > 0 && total > state.bytes_done => {
            Some(((total - state.bytes_done) as f64 / speed as f64) as u64)
        }
        _ => None,
    };
    ProgressSnapshot {
        job_id: job_id.clone(),
        phase,
        bytes_done: state.bytes_done,
        bytes_total: state.bytes_total,
        percent,
        speed_bps,
        eta_secs,
        status,
        updated_at: Utc::now(),
    }
}
