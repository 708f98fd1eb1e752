//! Bounded admission into the relay's resource pools
//!
//! Three independent pools (download, upload, processing) cap how many jobs
//! may hold each kind of slot at once. Waiters are served in arrival order,
//! a wait can be bounded by a timeout or abandoned through cancellation, and
//! an abandoned wait never consumes capacity. Slots release on drop, so a
//! panicking task cannot leak one.

use crate::config::CapacityConfig;
use crate::error::JobFailure;
use crate::types::ResourceClass;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

struct Pool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

/// A held capacity slot; the slot frees when this is dropped
#[derive(Debug)]
pub struct SlotPermit {
    class: ResourceClass,
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    /// The pool this slot came from
    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

/// The relay's three capacity pools
pub struct AdmissionControl {
    download: Pool,
    upload: Pool,
    processing: Pool,
}

impl AdmissionControl {
    /// Creates the pools with the configured capacities
    pub fn new(config: &CapacityConfig) -> Self {
        Self {
            download: Pool::new(config.max_concurrent_downloads),
            upload: Pool::new(config.max_concurrent_uploads),
            processing: Pool::new(config.max_concurrent_processing),
        }
    }

    /// Waits for a slot in `class`, in FIFO order behind earlier waiters
    ///
    /// The wait ends three ways: a slot is granted; `timeout` elapses
    /// ([`JobFailure::CapacityTimeout`]); or `cancel` fires
    /// ([`JobFailure::Cancelled`]). Ending without a grant leaves the pool's
    /// capacity untouched.
    pub async fn acquire(
        &self,
        class: ResourceClass,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SlotPermit, JobFailure> {
        let started = Instant::now();
        let semaphore = self.pool(class).semaphore.clone();

        let wait = async {
            tokio::select! {
                _ = cancel.cancelled() => Err(JobFailure::Cancelled),
                permit = semaphore.acquire_owned() => match permit {
                    Ok(p) => Ok(SlotPermit { class, _permit: p }),
                    Err(_) => Err(JobFailure::Internal {
                        message: format!("{class} pool is closed"),
                    }),
                },
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(JobFailure::CapacityTimeout {
                    class,
                    waited: started.elapsed(),
                }),
            },
            None => wait.await,
        }
    }

    /// Slots currently free in `class`
    pub fn available(&self, class: ResourceClass) -> usize {
        self.pool(class).semaphore.available_permits()
    }

    /// Configured size of `class`
    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.pool(class).capacity
    }

    fn pool(&self, class: ResourceClass) -> &Pool {
        match class {
            ResourceClass::Download => &self.download,
            ResourceClass::Upload => &self.upload,
            ResourceClass::Processing => &self.processing,
        }
    }
}
