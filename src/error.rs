//! Error types for media-relay
//!
//! This module provides error handling for the library, including:
//! - The terminal failure taxonomy for jobs ([`JobFailure`])
//! - Operational errors outside any single job ([`Error`])
//! - Machine-readable failure codes and single-line user-facing messages

use crate::types::{RateScope, ResourceClass};
use crate::utils::format_bytes;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-relay
///
/// Job-terminal failures are carried in the [`JobFailure`] sub-enum; the
/// remaining variants cover operational errors that occur outside the scope
/// of a single job (configuration, shutdown, lookups).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "temp_root")
        key: Option<String>,
    },

    /// A job reached a terminal failure
    #[error("job failed: {0}")]
    Job(#[from] JobFailure),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job not found (unknown or already terminal)
    #[error("job not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Terminal failure reasons for a job
///
/// Every non-completed terminal state carries exactly one of these. Each
/// variant maps to a machine-readable [`code`](JobFailure::code) and a single
/// human-actionable [`user_message`](JobFailure::user_message); internal
/// detail never leaks into the user message.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// A rate limit rejected the job before any work started
    #[error("rate limited at {scope} scope, retry in {}s", retry_after.as_secs())]
    RateLimited {
        /// Which limit level rejected the request
        scope: RateScope,
        /// Time until the rejecting window (or penalty) releases
        retry_after: Duration,
    },

    /// Waiting for a capacity slot exceeded the configured bound
    #[error("timed out after {}s waiting for a {class} slot", waited.as_secs())]
    CapacityTimeout {
        /// The resource class whose pool was saturated
        class: ResourceClass,
        /// How long the job waited before giving up
        waited: Duration,
    },

    /// The extraction engine does not support this source
    #[error("unsupported source: {url}")]
    UnsupportedSource {
        /// The offending source URL
        url: String,
    },

    /// Transient network failure from the extraction engine
    #[error("network error: {message}")]
    Network {
        /// Engine-reported detail
        message: String,
    },

    /// Permanent extraction failure (bad media, parse failure, empty output)
    #[error("extraction error: {message}")]
    Extraction {
        /// Engine-reported detail
        message: String,
    },

    /// Artifact exceeds the largest transport's ceiling
    #[error("artifact is {size_bytes} bytes, exceeding the {limit_bytes} byte transport ceiling")]
    TooLarge {
        /// Final artifact size in bytes
        size_bytes: u64,
        /// The large-transport ceiling in bytes
        limit_bytes: u64,
    },

    /// The upload transport failed
    #[error("upload error: {message}")]
    Upload {
        /// Transport-reported detail
        message: String,
        /// Whether the transport classified the failure as transient
        transient: bool,
    },

    /// A phase exceeded its configured timeout
    #[error("{phase} timed out after {}s", elapsed.as_secs())]
    Timeout {
        /// The phase that timed out ("extraction", "download", "upload")
        phase: String,
        /// Elapsed time when the timeout fired
        elapsed: Duration,
    },

    /// Not enough local disk space to stage the artifact
    #[error("insufficient storage: need {required} bytes, have {available} bytes")]
    InsufficientStorage {
        /// Number of bytes required for the artifact
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// The job was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Unexpected internal error
    #[error("internal error: {message}")]
    Internal {
        /// Internal detail, logged but never shown to users
        message: String,
    },
}

impl JobFailure {
    /// Machine-readable failure code for records and events
    pub fn code(&self) -> &'static str {
        match self {
            JobFailure::RateLimited { .. } => "rate_limited",
            JobFailure::CapacityTimeout { .. } => "capacity_timeout",
            JobFailure::UnsupportedSource { .. } => "unsupported_source",
            JobFailure::Network { .. } => "network_error",
            JobFailure::Extraction { .. } => "extraction_error",
            JobFailure::TooLarge { .. } => "too_large",
            JobFailure::Upload { .. } => "upload_error",
            JobFailure::Timeout { .. } => "timeout",
            JobFailure::InsufficientStorage { .. } => "insufficient_storage",
            JobFailure::Cancelled => "cancelled",
            JobFailure::Internal { .. } => "internal_error",
        }
    }

    /// One human-actionable line suitable for showing to the requesting user
    ///
    /// Internal detail (engine messages, paths, stack context) is deliberately
    /// excluded; it belongs in logs, not user-facing text.
    pub fn user_message(&self) -> String {
        match self {
            JobFailure::RateLimited { retry_after, .. } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                format!("rate limit exceeded, retry in {} seconds", secs.max(1))
            }
            JobFailure::CapacityTimeout { class, .. } => {
                format!("all {class} capacity is busy right now, try again in a few minutes")
            }
            JobFailure::UnsupportedSource { .. } => {
                "this source is not supported, check the link".to_string()
            }
            JobFailure::Network { .. } => {
                "a network problem interrupted the transfer, try again later".to_string()
            }
            JobFailure::Extraction { .. } => {
                "the media could not be extracted from this source".to_string()
            }
            JobFailure::TooLarge { limit_bytes, .. } => format!(
                "file exceeds the {} size limit, try a lower quality",
                format_bytes(*limit_bytes)
            ),
            JobFailure::Upload { .. } => "delivery failed, try again later".to_string(),
            JobFailure::Timeout { phase, .. } => {
                format!("the {phase} took too long and was aborted")
            }
            JobFailure::InsufficientStorage { .. } => {
                "not enough server storage to process this file right now".to_string()
            }
            JobFailure::Cancelled => "cancelled".to_string(),
            JobFailure::Internal { .. } => "an internal error occurred".to_string(),
        }
    }

    /// Whether this failure maps to the `Rejected` terminal state
    /// (pre-work refusals) rather than `Failed`
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            JobFailure::RateLimited { .. } | JobFailure::TooLarge { .. }
        )
    }
}

/// Collapse any operational error into a job-terminal failure.
///
/// Collaborators report failures as [`Error::Job`]; anything else reaching a
/// job task is unexpected and surfaces as `Internal`.
impl From<Error> for JobFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::Job(failure) => failure,
            other => JobFailure::Internal {
                message: other.to_string(),
            },
        }
    }
}
