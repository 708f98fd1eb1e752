//! Core relay implementation split into focused submodules.
//!
//! The `MediaRelay` struct and its methods are organized by domain:
//! - [`control`] - Job control (cancel, active listing, progress reads)
//! - [`lifecycle`] - Startup and shutdown coordination
//! - [`job_task`] - Core job execution pipeline
//! - [`background`] - Cache sweeping and transfer progress reporting

mod background;
mod control;
mod job_task;
mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::admission::AdmissionControl;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::engine::ExtractionEngine;
use crate::error::{Error, JobFailure, Result};
use crate::history::HistorySink;
use crate::progress::ProgressTracker;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::temp_files::TempFileManager;
use crate::transport::{LargeTransport, SmallTransport, TransportSelector};
use crate::types::{
    Event, JobId, JobOutcome, JobRecord, JobRequest, JobState, OperationKind, RelayStats,
    ResourceClass,
};

/// A job currently registered with the relay
pub(crate) struct ActiveJob {
    /// Last pipeline state the job reported
    pub(crate) state: JobState,
    /// Token that aborts the job's task when cancelled
    pub(crate) cancel_token: tokio_util::sync::CancellationToken,
    /// Join handle for the job's task (None briefly between insert and spawn)
    pub(crate) handle: Option<tokio::task::JoinHandle<()>>,
}

/// Job registration and shutdown state
#[derive(Clone)]
pub(crate) struct JobRegistry {
    /// Map of in-flight jobs to their state and cancellation tokens
    pub(crate) active:
        std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<JobId, ActiveJob>>>,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
    /// Token cancelled once, at shutdown, to stop background tasks
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
}

/// Pluggable collaborators behind trait objects
#[derive(Clone)]
pub(crate) struct Collaborators {
    /// Probes sources and fetches media
    pub(crate) engine: std::sync::Arc<dyn ExtractionEngine>,
    /// Direct delivery path for small artifacts
    pub(crate) small_transport: std::sync::Arc<dyn SmallTransport>,
    /// Progress-reporting delivery path for large artifacts
    pub(crate) large_transport: std::sync::Arc<dyn LargeTransport>,
    /// Sink receiving one record per finished job
    pub(crate) history: std::sync::Arc<dyn HistorySink>,
}

/// Lifetime counters for finished jobs
#[derive(Default)]
pub(crate) struct JobCounters {
    pub(crate) submitted: std::sync::atomic::AtomicU64,
    pub(crate) completed: std::sync::atomic::AtomicU64,
    pub(crate) rejected: std::sync::atomic::AtomicU64,
    pub(crate) failed: std::sync::atomic::AtomicU64,
    pub(crate) cancelled: std::sync::atomic::AtomicU64,
}

/// Main relay instance (cloneable - all fields are Arc-wrapped or cheap)
#[derive(Clone)]
pub struct MediaRelay {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: std::sync::Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Shared TTL cache for probe metadata and progress snapshots
    pub(crate) cache: CacheStore,
    /// Sliding-window rate limiter consulted once per submission
    pub(crate) rate_limiter: std::sync::Arc<RateLimiter>,
    /// FIFO admission pools for download, upload, and processing slots
    pub(crate) admission: std::sync::Arc<AdmissionControl>,
    /// Monotonic, throttled transfer progress tracker
    pub(crate) progress: ProgressTracker,
    /// Job-scoped temp file allocation and orphan sweeping
    pub(crate) temp: std::sync::Arc<TempFileManager>,
    /// Size-based transport tier selection
    pub(crate) selector: TransportSelector,
    /// Pluggable collaborators
    pub(crate) collaborators: Collaborators,
    /// Job registration and shutdown state
    pub(crate) registry: JobRegistry,
    /// Lifetime job counters
    pub(crate) counters: std::sync::Arc<JobCounters>,
}

impl MediaRelay {
    /// Create a new MediaRelay instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the temp root directory and optionally sweeps orphans in it
    /// - Sets up the event broadcast channel
    /// - Starts the background cache sweeper
    pub async fn new(
        config: Config,
        engine: std::sync::Arc<dyn ExtractionEngine>,
        small_transport: std::sync::Arc<dyn SmallTransport>,
        large_transport: std::sync::Arc<dyn LargeTransport>,
        history: std::sync::Arc<dyn HistorySink>,
    ) -> Result<Self> {
        config.validate()?;

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        // Shared cache, sized by the configured default TTL
        let cache = CacheStore::new(config.cache.default_ttl);

        // Progress tracker writes through the same cache
        let progress = ProgressTracker::new(cache.clone(), config.progress.clone());

        let rate_limiter = std::sync::Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let admission = std::sync::Arc::new(AdmissionControl::new(&config.capacity));
        let selector = TransportSelector::new(&config.transport);

        // Temp root is created up front so allocation failures surface early
        let temp = std::sync::Arc::new(
            TempFileManager::new(config.temp_root(), config.temp.orphan_grace).await?,
        );

        if config.temp.sweep_on_start {
            match temp.sweep_orphans().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Removed orphaned temp directories on startup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Orphan sweep failed on startup");
                }
            }
        }

        let registry = JobRegistry {
            active: std::sync::Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        };

        let collaborators = Collaborators {
            engine,
            small_transport,
            large_transport,
            history,
        };

        tracing::info!(
            engine = collaborators.engine.name(),
            small_transport = collaborators.small_transport.name(),
            large_transport = collaborators.large_transport.name(),
            history = collaborators.history.name(),
            "Relay collaborators initialized"
        );

        let relay = Self {
            config: std::sync::Arc::new(config),
            event_tx,
            cache,
            rate_limiter,
            admission,
            progress,
            temp,
            selector,
            collaborators,
            registry,
            counters: std::sync::Arc::new(JobCounters::default()),
        };

        // Expired cache entries are reclaimed periodically until shutdown
        background::spawn_cache_sweeper(
            relay.cache.clone(),
            relay.config.cache.sweep_interval,
            relay.registry.shutdown_token.child_token(),
        );

        Ok(relay)
    }

    /// Submit a job for processing
    ///
    /// The URL is normalized and rate limits are checked inline; a request
    /// that fails either never becomes a tracked job. Accepted jobs run on a
    /// background task and report through events, so this returns as soon as
    /// the job is registered.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once shutdown has begun
    /// - [`JobFailure::UnsupportedSource`] for URLs the relay will not touch
    /// - [`JobFailure::RateLimited`] when a rate window is exhausted; the
    ///   failure carries how long to wait before retrying
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_relay::{JobRequest, MediaRelay, UserId};
    ///
    /// # async fn example(relay: MediaRelay) -> Result<(), Box<dyn std::error::Error>> {
    /// let id = relay
    ///     .submit(JobRequest {
    ///         user: UserId::new(42),
    ///         url: "https://example.com/watch?v=1".to_string(),
    ///         format_id: None,
    ///         file_name: None,
    ///     })
    ///     .await?;
    /// println!("job accepted: {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        use std::sync::atomic::Ordering;

        if !self.registry.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        // A source that cannot be parsed never becomes a job
        let source_url = crate::engine::normalize_source_url(&request.url)?;

        let id = JobId::generate();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.emit_event(Event::JobSubmitted {
            job_id: id.clone(),
            user: request.user,
            url: source_url.to_string(),
        });

        // Rate check happens before anything is allocated; a rejected
        // attempt consumes no quota and leaves no registered job behind
        if let RateDecision::Rejected { scope, retry_after } = self
            .rate_limiter
            .check_and_record(request.user, OperationKind::Download)
            .await
        {
            let failure = JobFailure::RateLimited { scope, retry_after };
            self.record_rejection(&id, &request, source_url.as_str(), &failure)
                .await;
            return Err(Error::Job(failure));
        }

        // Register before spawning so cancel() can always find the job
        let cancel_token = tokio_util::sync::CancellationToken::new();
        {
            let mut active = self.registry.active.lock().await;
            active.insert(
                id.clone(),
                ActiveJob {
                    state: JobState::RateChecked,
                    cancel_token: cancel_token.clone(),
                    handle: None,
                },
            );
        }

        tracing::debug!(job_id = %id, user = %request.user, url = %source_url, "Job accepted");

        let ctx = job_task::JobTaskContext {
            id: id.clone(),
            request,
            source_url,
            relay: self.clone(),
            cancel_token,
            started: std::time::Instant::now(),
            created_at: chrono::Utc::now(),
        };
        let handle = tokio::spawn(job_task::run_job_task(ctx));

        // The task may already have finished and unregistered itself
        let mut active = self.registry.active.lock().await;
        if let Some(job) = active.get_mut(&id) {
            job.handle = Some(handle);
        }

        Ok(id)
    }

    /// Subscribe to relay events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently. Events are buffered, but if a subscriber falls behind by
    /// more than 1000 events, it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_relay::MediaRelay;
    ///
    /// # async fn example(relay: MediaRelay) {
    /// let mut events = relay.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "relay event");
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    ///
    /// The configuration is wrapped in an Arc, so this is a cheap clone.
    pub fn get_config(&self) -> std::sync::Arc<Config> {
        std::sync::Arc::clone(&self.config)
    }

    /// Snapshot of relay counters and pool occupancy
    pub async fn stats(&self) -> RelayStats {
        use std::sync::atomic::Ordering;

        let active = self.registry.active.lock().await.len() as u64;
        RelayStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            active,
            available_download_slots: self.admission.available(ResourceClass::Download),
            available_upload_slots: self.admission.available(ResourceClass::Upload),
            available_processing_slots: self.admission.available(ResourceClass::Processing),
            cache: self.cache.stats().await,
            rate_limiter: self.rate_limiter.stats(),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped
    /// (ok() converts Err to None). Jobs keep running whether or not anyone
    /// is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Record and announce a submission-time rejection
    async fn record_rejection(
        &self,
        id: &JobId,
        request: &JobRequest,
        source_url: &str,
        failure: &JobFailure,
    ) {
        self.counters
            .rejected
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let now = chrono::Utc::now();
        let record = JobRecord {
            job_id: id.clone(),
            user: request.user,
            source_url: source_url.to_string(),
            outcome: JobOutcome::Rejected,
            failure_code: Some(failure.code().to_string()),
            failure_reason: Some(failure.user_message()),
            final_size_bytes: None,
            checksum_sha256: None,
            transport: None,
            delivery_id: None,
            created_at: now,
            finished_at: now,
            duration_ms: 0,
        };
        if let Err(e) = self.collaborators.history.record(&record).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to record rejected job");
        }

        let retry_after_secs = match failure {
            JobFailure::RateLimited { retry_after, .. } => {
                Some(crate::rate_limiter::ceil_secs(*retry_after))
            }
            _ => None,
        };
        self.emit_event(Event::JobRejected {
            job_id: id.clone(),
            code: failure.code().to_string(),
            reason: failure.user_message(),
            retry_after_secs,
        });
    }
}
