//! Job control — cancellation, active listing, progress reads.

use crate::error::{Error, Result};
use crate::types::{JobId, JobState, ProgressSnapshot, TransferPhase};

use super::MediaRelay;

impl MediaRelay {
    /// Cancel a job
    ///
    /// Signals the job's cancellation token. The job task notices at its
    /// next await point, stops where it is, and settles through the normal
    /// finalization path: slots return to their pools, the temp artifact is
    /// removed, and a `JobCancelled` event plus a `Cancelled` record go out.
    /// Cancellation is therefore asynchronous; this method returns as soon
    /// as the signal is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the job is not active, either
    /// because the id is unknown or because the job already settled.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_relay::{MediaRelay, JobId, Result};
    /// # async fn example(relay: MediaRelay, id: JobId) -> Result<()> {
    /// relay.cancel(&id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let active = self.registry.active.lock().await;
        let Some(job) = active.get(id) else {
            return Err(Error::NotFound(format!("job {id} is not active")));
        };
        job.cancel_token.cancel();
        drop(active);

        tracing::info!(job_id = %id, "Cancellation requested");
        Ok(())
    }

    /// List in-flight jobs and their last reported pipeline state
    pub async fn active_jobs(&self) -> Vec<(JobId, JobState)> {
        let active = self.registry.active.lock().await;
        active
            .iter()
            .map(|(id, job)| (id.clone(), job.state))
            .collect()
    }

    /// Latest progress snapshot for one transfer of a job
    ///
    /// Progress is advisory: `None` means the transfer has not reported yet
    /// or its snapshot already expired.
    pub async fn progress(&self, id: &JobId, phase: TransferPhase) -> Option<ProgressSnapshot> {
        self.progress.read(id, phase).await
    }
}
