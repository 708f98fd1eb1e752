//! Configuration types for media-relay

use crate::error::{Error, Result};
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Temp storage configuration (staging root, orphan handling)
///
/// Groups settings for where in-flight artifacts are staged and how leftovers
/// from earlier runs are reclaimed. Used as a flattened sub-config within
/// [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TempConfig {
    /// Root directory for per-job staging directories (default: "./relay-temp")
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,

    /// Age after which an unclaimed staging directory counts as orphaned
    /// (default: 1 hour)
    #[serde(default = "default_orphan_grace", with = "duration_serde")]
    pub orphan_grace: Duration,

    /// Sweep orphaned staging directories during startup (default: true)
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            orphan_grace: default_orphan_grace(),
            sweep_on_start: true,
        }
    }
}

/// Concurrency limits for the three resource pools
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Maximum concurrent downloads (default: 5)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Maximum concurrent uploads (default: 3)
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Maximum concurrent local processing steps (default: 8)
    #[serde(default = "default_max_concurrent_processing")]
    pub max_concurrent_processing: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_concurrent_processing: default_max_concurrent_processing(),
        }
    }
}

/// Transport size boundaries
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest artifact the small transport accepts, in bytes
    /// (default: 50 MiB)
    #[serde(default = "default_small_transport_limit")]
    pub small_transport_limit: u64,

    /// Hard ceiling for any delivery, in bytes (default: 2 GiB)
    ///
    /// Artifacts above this size are rejected; there is no transport
    /// behind it.
    #[serde(default = "default_large_transport_limit")]
    pub large_transport_limit: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            small_transport_limit: default_small_transport_limit(),
            large_transport_limit: default_large_transport_limit(),
        }
    }
}

/// One fixed rate window plus the penalty applied when it rejects
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Requests allowed inside one window
    pub max_requests: u32,

    /// Window length
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Cooldown imposed on the offending user after a rejection at this
    /// level; only the per-user and per-operation levels apply one
    #[serde(with = "duration_serde")]
    pub penalty: Duration,
}

impl RateWindowConfig {
    /// Creates a window config from raw parts
    pub fn new(max_requests: u32, window: Duration, penalty: Duration) -> Self {
        Self {
            max_requests,
            window,
            penalty,
        }
    }
}

/// Rate limiting configuration
///
/// Nested under `rate_limits` in the serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; when false every check is allowed (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Apply post-rejection cooldowns to offending users (default: true)
    #[serde(default = "default_true")]
    pub penalties_enabled: bool,

    /// Users that bypass every limit
    #[serde(default)]
    pub exempt_users: Vec<UserId>,

    /// Whole-service window shared by all users; rejections here block the
    /// request but never penalize the requester
    /// (default: 100 requests per minute)
    #[serde(default = "default_global_window")]
    pub global: RateWindowConfig,

    /// Per-user window across all operations
    /// (default: 10 requests per hour, 5 minute penalty)
    #[serde(default = "default_per_user_window")]
    pub per_user: RateWindowConfig,

    /// Per-user window for download jobs
    /// (default: 3 requests per minute, 60s penalty)
    #[serde(default = "default_download_window")]
    pub download: RateWindowConfig,

    /// Per-user window for lightweight commands
    /// (default: 10 requests per minute, 30s penalty)
    #[serde(default = "default_command_window")]
    pub command: RateWindowConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            penalties_enabled: true,
            exempt_users: Vec::new(),
            global: default_global_window(),
            per_user: default_per_user_window(),
            download: default_download_window(),
            command: default_command_window(),
        }
    }
}

/// Progress tracking configuration
///
/// Nested under `progress` in the serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum gap between persisted snapshots of one transfer
    /// (default: 500 ms)
    ///
    /// Updates arriving faster than this are folded into the next snapshot
    /// rather than written individually.
    #[serde(default = "default_min_update_interval", with = "duration_millis_serde")]
    pub min_update_interval: Duration,

    /// How long a snapshot stays readable after its last update
    /// (default: 1 hour)
    #[serde(default = "default_progress_ttl", with = "duration_serde")]
    pub ttl: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_update_interval: default_min_update_interval(),
            ttl: default_progress_ttl(),
        }
    }
}

/// Cache store configuration
///
/// Nested under `cache` in the serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write does not specify one (default: 1 hour)
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub default_ttl: Duration,

    /// TTL for probed source metadata (default: 1 hour)
    #[serde(default = "default_metadata_ttl", with = "duration_serde")]
    pub metadata_ttl: Duration,

    /// How often the background sweeper drops expired entries
    /// (default: 5 minutes)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_cache_ttl(),
            metadata_ttl: default_metadata_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Per-phase time bounds
///
/// Nested under `timeouts` in the serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on waiting for a capacity slot (default: none, wait until
    /// cancelled)
    #[serde(default, with = "optional_duration_serde")]
    pub slot_acquire: Option<Duration>,

    /// Bound on probing a source (default: 60 seconds)
    #[serde(default = "default_extraction_timeout", with = "duration_serde")]
    pub extraction: Duration,

    /// Bound on the download transfer (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub download: Duration,

    /// Bound on the upload transfer (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub upload: Duration,

    /// How long shutdown waits for in-flight jobs to wind down
    /// (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            slot_acquire: None,
            extraction: default_extraction_timeout(),
            download: default_transfer_timeout(),
            upload: default_transfer_timeout(),
            shutdown: default_shutdown_timeout(),
        }
    }
}

/// Retry pacing for transient failures
///
/// Nested under `retry` in the serialized form. The job pipeline retries a
/// failed transfer at most once regardless of `max_attempts`; this section
/// mainly controls the delay between attempts and the generic
/// [`with_retry`](crate::retry::with_retry) helper.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts for the generic retry helper (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Local storage safeguards
///
/// Nested under `storage` in the serialized form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Refuse downloads whose estimate would leave less than this many free
    /// bytes (default: no check)
    #[serde(default)]
    pub min_free_bytes: Option<u64>,

    /// Compute a SHA-256 of each completed artifact before upload
    /// (default: false)
    #[serde(default)]
    pub compute_checksum: bool,
}

/// Main configuration for the media relay
///
/// Fields are organized into logical sub-configs:
/// - [`temp`](TempConfig) — staging root and orphan handling
/// - [`capacity`](CapacityConfig) — pool concurrency limits
/// - [`transport`](TransportConfig) — delivery size boundaries
/// - [`rate_limits`](RateLimitConfig), [`progress`](ProgressConfig),
///   [`cache`](CacheConfig), [`timeouts`](TimeoutConfig),
///   [`retry`](RetryConfig), [`storage`](StorageConfig)
///
/// The first three are flattened for a flat top-level serialized form; the
/// rest are nested sections. Every field has a default, so an empty document
/// deserializes to a fully working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Temp storage settings
    #[serde(flatten)]
    pub temp: TempConfig,

    /// Pool concurrency limits
    #[serde(flatten)]
    pub capacity: CapacityConfig,

    /// Transport size boundaries
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Rate limiting settings
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Progress tracking settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Cache store settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-phase time bounds
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry pacing
    #[serde(default)]
    pub retry: RetryConfig,

    /// Local storage safeguards
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Root directory for per-job staging directories
    pub fn temp_root(&self) -> &PathBuf {
        &self.temp.temp_root
    }

    /// Checks cross-field consistency before the relay starts
    pub fn validate(&self) -> Result<()> {
        if self.transport.small_transport_limit == 0 {
            return Err(Error::Config {
                message: "small transport limit must be at least 1 byte".into(),
                key: Some("small_transport_limit".into()),
            });
        }
        if self.transport.small_transport_limit > self.transport.large_transport_limit {
            return Err(Error::Config {
                message: format!(
                    "small transport limit ({}) exceeds the large transport limit ({})",
                    self.transport.small_transport_limit, self.transport.large_transport_limit
                ),
                key: Some("small_transport_limit".into()),
            });
        }
        for (key, value) in [
            (
                "max_concurrent_downloads",
                self.capacity.max_concurrent_downloads,
            ),
            ("max_concurrent_uploads", self.capacity.max_concurrent_uploads),
            (
                "max_concurrent_processing",
                self.capacity.max_concurrent_processing,
            ),
        ] {
            if value == 0 {
                return Err(Error::Config {
                    message: format!("{key} must be at least 1"),
                    key: Some(key.into()),
                });
            }
        }
        if self.rate_limits.enabled {
            for (key, window) in [
                ("rate_limits.global", &self.rate_limits.global),
                ("rate_limits.per_user", &self.rate_limits.per_user),
                ("rate_limits.download", &self.rate_limits.download),
                ("rate_limits.command", &self.rate_limits.command),
            ] {
                if window.max_requests == 0 {
                    return Err(Error::Config {
                        message: format!("{key}.max_requests of 0 would reject every request"),
                        key: Some(key.into()),
                    });
                }
                if window.window.is_zero() {
                    return Err(Error::Config {
                        message: format!("{key}.window must be non-zero"),
                        key: Some(key.into()),
                    });
                }
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier below 1.0 would shrink retry delays".into(),
                key: Some("retry.backoff_multiplier".into()),
            });
        }
        Ok(())
    }
}

fn default_temp_root() -> PathBuf {
    PathBuf::from("./relay-temp")
}

fn default_orphan_grace() -> Duration {
    Duration::from_secs(3600)
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_downloads() -> usize {
    5
}

fn default_max_concurrent_uploads() -> usize {
    3
}

fn default_max_concurrent_processing() -> usize {
    8
}

fn default_small_transport_limit() -> u64 {
    50 * 1024 * 1024
}

fn default_large_transport_limit() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_global_window() -> RateWindowConfig {
    RateWindowConfig::new(100, Duration::from_secs(60), Duration::from_secs(30))
}

fn default_per_user_window() -> RateWindowConfig {
    RateWindowConfig::new(10, Duration::from_secs(3600), Duration::from_secs(300))
}

fn default_download_window() -> RateWindowConfig {
    RateWindowConfig::new(3, Duration::from_secs(60), Duration::from_secs(60))
}

fn default_command_window() -> RateWindowConfig {
    RateWindowConfig::new(10, Duration::from_secs(60), Duration::from_secs(30))
}

fn default_min_update_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_progress_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_metadata_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_extraction_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond variant for sub-second intervals
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
