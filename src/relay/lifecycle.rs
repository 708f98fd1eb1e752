//! Startup and shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::MediaRelay;

impl MediaRelay {
    /// Gracefully shut down the relay
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new jobs
    /// 2. Stops background tasks (cache sweeper)
    /// 3. Cancels every active job
    /// 4. Waits for active jobs to settle, bounded by the shutdown timeout
    /// 5. Emits the shutdown event
    ///
    /// Cancelled jobs settle through their normal finalization path, so
    /// their slots are returned, temp directories removed, and records
    /// written before this method returns. Jobs still running when the
    /// timeout elapses are left to finish in the background; their temp
    /// directories are reclaimed by the orphan sweep on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new jobs
        self.registry
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new jobs");

        // 2. Stop background tasks
        self.registry.shutdown_token.cancel();

        // 3. Cancel all active jobs and collect their handles
        let handles: Vec<tokio::task::JoinHandle<()>> = {
            let mut active = self.registry.active.lock().await;
            tracing::info!(active_count = active.len(), "Cancelling active jobs");
            active
                .values_mut()
                .filter_map(|job| {
                    job.cancel_token.cancel();
                    job.handle.take()
                })
                .collect()
        };

        // 4. Wait for the cancelled jobs to settle, bounded by the timeout
        let wait = futures::future::join_all(handles);
        match tokio::time::timeout(self.config.timeouts.shutdown, wait).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Job task panicked during shutdown");
                    }
                }
                tracing::info!("All active jobs settled");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.timeouts.shutdown.as_secs(),
                    "Timeout waiting for jobs to settle, proceeding with shutdown"
                );
            }
        }

        // 5. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
