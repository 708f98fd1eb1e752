//! # media-relay
//!
//! Backend library for fetch-and-deliver media pipelines: probe a source
//! URL, download the media through a pluggable extraction engine, and hand
//! the artifact to a size-appropriate transport, with rate limiting,
//! bounded concurrency, and progress reporting around the whole path.
//!
//! ## Design Philosophy
//!
//! media-relay is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pluggable at the edges** - Extraction, delivery, and history are
//!   traits the embedder implements; the relay owns everything between
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Self-limiting** - Rate windows and capacity pools keep one noisy
//!   user or a submission burst from monopolizing the host
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_relay::{Config, JobRequest, MediaRelay, NoOpHistorySink, UserId};
//! # use media_relay::{ExtractionEngine, SmallTransport, LargeTransport};
//! # fn collaborators() -> (Arc<dyn ExtractionEngine>, Arc<dyn SmallTransport>, Arc<dyn LargeTransport>) { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (engine, small, large) = collaborators();
//!     let relay = MediaRelay::new(
//!         Config::default(),
//!         engine,
//!         small,
//!         large,
//!         Arc::new(NoOpHistorySink),
//!     )
//!     .await?;
//!
//!     // Subscribe to events
//!     let mut events = relay.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = relay
//!         .submit(JobRequest {
//!             user: UserId::new(42),
//!             url: "https://example.com/watch?v=1".to_string(),
//!             format_id: None,
//!             file_name: None,
//!         })
//!         .await?;
//!     println!("submitted {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Concurrency admission pools
pub mod admission;
/// Advisory TTL cache
pub mod cache;
/// Configuration types
pub mod config;
/// Extraction engine contract
pub mod engine;
/// Error types
pub mod error;
/// Job history sinks
pub mod history;
/// Transfer progress tracking
pub mod progress;
/// Sliding-window rate limiting
pub mod rate_limiter;
/// Core relay implementation (decomposed into focused submodules)
pub mod relay;
/// Retry logic with exponential backoff
pub mod retry;
/// Job-scoped temp file lifecycle
pub mod temp_files;
/// Delivery transports and tier selection
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use admission::{AdmissionControl, SlotPermit};
pub use cache::CacheStore;
pub use config::{Config, RateLimitConfig, RateWindowConfig};
pub use engine::{ExtractionEngine, ProgressFn};
pub use error::{Error, JobFailure, Result};
pub use history::{HistorySink, MemoryHistorySink, NoOpHistorySink};
pub use progress::ProgressTracker;
pub use rate_limiter::{RateDecision, RateLimiter};
pub use relay::MediaRelay;
pub use temp_files::{TempArtifact, TempFileManager};
pub use transport::{LargeTransport, SmallTransport, TransportSelector, UploadMetadata};
pub use types::{
    CacheStats, DeliveryId, Event, JobId, JobOutcome, JobRecord, JobRequest, JobState,
    MediaFormat, OperationKind, ProgressSnapshot, ProgressStatus, RateLimiterStats, RateScope,
    RelayStats, ResourceClass, TransferPhase, TransportKind, UserId,
};

/// Helper function to run the relay with graceful signal handling.
///
/// Waits for a termination signal and then calls the relay's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use media_relay::{Config, MediaRelay, NoOpHistorySink, run_with_shutdown};
/// # use media_relay::{ExtractionEngine, SmallTransport, LargeTransport};
/// # fn collaborators() -> (Arc<dyn ExtractionEngine>, Arc<dyn SmallTransport>, Arc<dyn LargeTransport>) { unimplemented!() }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (engine, small, large) = collaborators();
///     let relay = MediaRelay::new(
///         Config::default(),
///         engine,
///         small,
///         large,
///         Arc::new(NoOpHistorySink),
///     )
///     .await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(relay).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(relay: MediaRelay) -> Result<()> {
    wait_for_signal().await;
    relay.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
