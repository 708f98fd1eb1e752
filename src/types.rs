//! Core types for media-relay
//!
//! Identifiers, the job state machine, progress and record payloads, and the
//! broadcast [`Event`] stream shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a relay job
///
/// Opaque to callers; generated ids embed a millisecond timestamp plus a
/// process-local sequence number so concurrent submissions never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

static NEXT_JOB_SEQ: AtomicU64 = AtomicU64::new(0);

impl JobId {
    /// Creates a new JobId from an existing identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier for a newly submitted job
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let seq = NEXT_JOB_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
        Self(format!("job-{millis}-{seq:04}"))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of the user a job is performed on behalf of
///
/// Per-user rate windows and exemptions key off this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Creates a new UserId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Identifier returned by a transport after a successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Creates a new DeliveryId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeliveryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The bounded resource pools a job competes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Fetching media from the remote source
    Download,
    /// Delivering the artifact through a transport
    Upload,
    /// Local post-download work (sizing, checksumming)
    Processing,
}

impl ResourceClass {
    /// Returns the lowercase name used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Download => "download",
            ResourceClass::Upload => "upload",
            ResourceClass::Processing => "processing",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation kinds with their own per-user rate windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A media fetch-and-relay job
    Download,
    /// A lightweight command (status query, cancellation)
    Command,
}

impl OperationKind {
    /// Returns the lowercase name used in logs and window keys
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Download => "download",
            OperationKind::Command => "command",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The rate-limit level that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    /// Whole-service window shared by all users
    Global,
    /// Per-user window across all operations
    User,
    /// Per-user window for one operation kind
    Operation,
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateScope::Global => "global",
            RateScope::User => "user",
            RateScope::Operation => "operation",
        };
        write!(f, "{s}")
    }
}

/// The two transfer directions progress is tracked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    /// Bytes arriving from the remote source
    Download,
    /// Bytes leaving through a transport
    Upload,
}

impl TransferPhase {
    /// Returns the lowercase name used in progress cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Download => "download",
            TransferPhase::Upload => "upload",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery mechanism tiers, ordered by the artifact sizes they accept
///
/// Deliberately a closed set: adding a tier is a source-level change to the
/// selector and the upload phase, not a runtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Low-overhead path for artifacts up to the small-transport limit
    Small,
    /// Chunked path for artifacts up to the hard ceiling
    Large,
}

impl TransportKind {
    /// Returns the lowercase name used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Small => "small",
            TransportKind::Large => "large",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle states
///
/// Forward-only: a job moves left to right through the non-terminal states
/// and every run ends in exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by submit, not yet rate-checked
    Submitted,
    /// Passed all rate-limit levels
    RateChecked,
    /// Holding a download slot
    AdmittedDownload,
    /// Probing the source for available formats
    Extracting,
    /// Fetching bytes to local temp storage
    Downloading,
    /// Artifact staged locally, download slot released
    Downloaded,
    /// Holding an upload slot
    AdmittedUpload,
    /// Transport tier chosen from the actual artifact size
    TransportSelected,
    /// Sending the artifact through the selected transport
    Uploading,
    /// Terminal: delivered successfully
    Completed,
    /// Terminal: refused before transfer work (rate limit, size precheck)
    Rejected,
    /// Terminal: failed during processing
    Failed,
    /// Terminal: cancelled by request or shutdown
    Cancelled,
}

impl JobState {
    /// Whether this state ends the job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Rejected | JobState::Failed | JobState::Cancelled
        )
    }

    /// Returns the lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::RateChecked => "rate_checked",
            JobState::AdmittedDownload => "admitted_download",
            JobState::Extracting => "extracting",
            JobState::Downloading => "downloading",
            JobState::Downloaded => "downloaded",
            JobState::AdmittedUpload => "admitted_upload",
            JobState::TransportSelected => "transport_selected",
            JobState::Uploading => "uploading",
            JobState::Completed => "completed",
            JobState::Rejected => "rejected",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request to fetch a remote media resource and re-deliver it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// User the job is performed on behalf of
    pub user: UserId,
    /// Source URL to fetch from
    pub url: String,
    /// Preferred format id; the first probed format is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    /// Delivery file name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One downloadable format reported by the extraction engine's probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Engine-scoped format identifier, passed back to fetch
    pub format_id: String,
    /// Container / file extension hint (e.g. "mp4")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Estimated artifact size in bytes, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_estimate: Option<u64>,
}

/// Status carried in a progress snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Transfer in flight
    Active,
    /// Transfer finished successfully
    Completed,
    /// Transfer ended in failure
    Failed,
    /// Transfer was cancelled
    Cancelled,
}

/// Point-in-time view of one transfer, readable by pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Job the transfer belongs to
    pub job_id: JobId,
    /// Which direction is transferring
    pub phase: TransferPhase,
    /// High-water mark of bytes moved so far
    pub bytes_done: u64,
    /// Total expected bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    /// Completion percentage, when the total is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f32>,
    /// Observed transfer speed in bytes per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining, when derivable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// Whether the transfer is still active or how it ended
    pub status: ProgressStatus,
    /// When this snapshot was written
    pub updated_at: DateTime<Utc>,
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Delivered successfully
    Completed,
    /// Refused before transfer work started
    Rejected,
    /// Failed during processing
    Failed,
    /// Cancelled by request or shutdown
    Cancelled,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Rejected => "rejected",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The single durable record written when a job reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier
    pub job_id: JobId,
    /// User the job belonged to
    pub user: UserId,
    /// Normalized source URL
    pub source_url: String,
    /// Terminal outcome
    pub outcome: JobOutcome,
    /// Machine-readable failure code for non-completed outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<String>,
    /// Human-readable failure summary for non-completed outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Final artifact size in bytes, when a download completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_size_bytes: Option<u64>,
    /// SHA-256 of the artifact, when checksumming is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
    /// Transport the artifact was delivered through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    /// Transport-issued delivery identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the job reached its terminal state
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration from submit to terminal, in milliseconds
    pub duration_ms: u64,
}

/// Events emitted through the relay's broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A job passed validation and entered the pipeline
    JobSubmitted {
        /// Job identifier
        job_id: JobId,
        /// Requesting user
        user: UserId,
        /// Normalized source URL
        url: String,
    },
    /// A job acquired a capacity slot
    JobAdmitted {
        /// Job identifier
        job_id: JobId,
        /// Pool the slot came from
        class: ResourceClass,
    },
    /// Probe of the source started
    ExtractionStarted {
        /// Job identifier
        job_id: JobId,
    },
    /// Fetch from the remote source started
    DownloadStarted {
        /// Job identifier
        job_id: JobId,
        /// Selected format
        format_id: String,
        /// Size estimate from the probe, when available
        #[serde(skip_serializing_if = "Option::is_none")]
        size_estimate: Option<u64>,
    },
    /// Periodic download progress
    DownloadProgress {
        /// Job identifier
        job_id: JobId,
        /// Bytes fetched so far
        bytes_done: u64,
        /// Total expected bytes, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes_total: Option<u64>,
    },
    /// Artifact fully staged in temp storage
    DownloadFinished {
        /// Job identifier
        job_id: JobId,
        /// Actual artifact size
        size_bytes: u64,
    },
    /// Transport tier chosen from the actual artifact size
    TransportSelected {
        /// Job identifier
        job_id: JobId,
        /// Chosen tier
        transport: TransportKind,
    },
    /// Delivery through the selected transport started
    UploadStarted {
        /// Job identifier
        job_id: JobId,
        /// Tier in use
        transport: TransportKind,
    },
    /// Periodic upload progress
    UploadProgress {
        /// Job identifier
        job_id: JobId,
        /// Bytes sent so far
        bytes_done: u64,
        /// Total bytes to send
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes_total: Option<u64>,
    },
    /// Terminal: delivered successfully
    JobCompleted {
        /// Job identifier
        job_id: JobId,
        /// Final artifact size
        size_bytes: u64,
        /// Transport used
        transport: TransportKind,
        /// Transport-issued delivery identifier
        delivery_id: String,
    },
    /// Terminal: refused before transfer work
    JobRejected {
        /// Job identifier
        job_id: JobId,
        /// Machine-readable failure code
        code: String,
        /// Human-readable reason
        reason: String,
        /// Seconds until a retry may succeed, for rate-limit rejections
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
    /// Terminal: failed during processing
    JobFailed {
        /// Job identifier
        job_id: JobId,
        /// Machine-readable failure code
        code: String,
        /// Human-readable reason
        reason: String,
    },
    /// Terminal: cancelled by request or shutdown
    JobCancelled {
        /// Job identifier
        job_id: JobId,
    },
    /// The relay finished shutting down
    Shutdown,
}

/// Counters exposed by the rate limiter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Total decisions made
    pub checks: u64,
    /// Decisions that allowed the request
    pub allowed: u64,
    /// Rejections at the global window
    pub rejected_global: u64,
    /// Rejections at a per-user window
    pub rejected_user: u64,
    /// Rejections at a per-operation window
    pub rejected_operation: u64,
    /// Rejections by an active penalty
    pub rejected_penalty: u64,
}

/// Counters exposed by the cache store
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries at sampling time
    pub entries: u64,
    /// Lookups that returned a live value
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Values written
    pub sets: u64,
    /// Explicit invalidations
    pub invalidations: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
}

/// Aggregate counters for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStats {
    /// Jobs accepted by submit
    pub submitted: u64,
    /// Jobs that completed successfully
    pub completed: u64,
    /// Jobs rejected before transfer work
    pub rejected: u64,
    /// Jobs that failed during processing
    pub failed: u64,
    /// Jobs cancelled by request or shutdown
    pub cancelled: u64,
    /// Jobs currently in flight
    pub active: u64,
    /// Free download slots
    pub available_download_slots: usize,
    /// Free upload slots
    pub available_upload_slots: usize,
    /// Free processing slots
    pub available_processing_slots: usize,
    /// Cache counters
    pub cache: CacheStats,
    /// Rate limiter counters
    pub rate_limiter: RateLimiterStats,
}
