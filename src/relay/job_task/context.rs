//! Job task context — shared state and registry/event helpers.

use crate::admission::SlotPermit;
use crate::temp_files::TempArtifact;
use crate::types::{Event, JobId, JobRequest, JobState};

use super::super::MediaRelay;

/// Shared context for a single job task, reducing parameter passing between
/// the phase helpers.
pub(crate) struct JobTaskContext {
    pub(crate) id: JobId,
    pub(crate) request: JobRequest,
    /// Normalized source URL; the raw request string is never used past submit
    pub(crate) source_url: url::Url,
    pub(crate) relay: MediaRelay,
    pub(crate) cancel_token: tokio_util::sync::CancellationToken,
    /// Task start, for the duration recorded with the job
    pub(crate) started: std::time::Instant,
    /// Submission time, recorded with the job
    pub(crate) created_at: chrono::DateTime<chrono::Utc>,
}

/// Everything a job holds that must be released when it ends
///
/// Slots are released by dropping their permits; the artifact wants an
/// explicit async cleanup. Fields are Options so phases can hand resources
/// over (and release them early) one at a time.
#[derive(Default)]
pub(crate) struct JobResources {
    pub(crate) artifact: Option<TempArtifact>,
    pub(crate) download_slot: Option<SlotPermit>,
    pub(crate) upload_slot: Option<SlotPermit>,
    /// True once a download progress key may exist and needs a terminal write
    pub(crate) download_tracked: bool,
    /// True once an upload progress key may exist and needs a terminal write
    pub(crate) upload_tracked: bool,
}

impl JobTaskContext {
    /// Record the job's pipeline state in the registry
    pub(crate) async fn set_state(&self, state: JobState) {
        let mut active = self.relay.registry.active.lock().await;
        if let Some(job) = active.get_mut(&self.id) {
            job.state = state;
        }
        drop(active);
        tracing::debug!(job_id = %self.id, state = %state, "Job state changed");
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit(&self, event: Event) {
        self.relay.emit_event(event);
    }

    /// Remove this job from the active registry
    pub(crate) async fn remove_from_active(&self) {
        let mut active = self.relay.registry.active.lock().await;
        active.remove(&self.id);
    }
}
