//! Stub collaborators and relay builders shared by the end-to-end tests
//!
//! The stubs here only implement the public collaborator traits: an engine
//! that writes zero-filled artifacts, transports that acknowledge deliveries
//! without moving bytes, and the in-memory history sink the crate ships.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use media_relay::{
    Config, DeliveryId, Error, ExtractionEngine, JobFailure, JobRequest, LargeTransport,
    MediaFormat, MediaRelay, MemoryHistorySink, ProgressFn, SmallTransport, UploadMetadata,
    UserId,
};

/// Engine that serves a canned format list and writes zero-filled artifacts.
pub struct StubEngine {
    formats: Vec<MediaFormat>,
    artifact_bytes: u64,
    fetch_delay: Duration,
    flaky_fetches: AtomicUsize,
    /// Number of probe calls observed
    pub probe_calls: AtomicUsize,
    /// Number of fetch calls observed
    pub fetch_calls: AtomicUsize,
}

impl StubEngine {
    /// One format whose estimate matches the bytes the fetch will write.
    pub fn sized(bytes: u64) -> Self {
        Self {
            formats: vec![MediaFormat {
                format_id: "best".to_string(),
                container: Some("mp4".to_string()),
                size_estimate: Some(bytes),
            }],
            artifact_bytes: bytes,
            fetch_delay: Duration::ZERO,
            flaky_fetches: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Like [`sized`](Self::sized) but the probe reports no estimate, so
    /// size checks can only happen after the artifact lands on disk.
    pub fn unsized_output(bytes: u64) -> Self {
        let mut engine = Self::sized(bytes);
        engine.formats[0].size_estimate = None;
        engine
    }

    /// Writes `bytes` but advertises `estimate` from the probe.
    pub fn estimated(bytes: u64, estimate: u64) -> Self {
        let mut engine = Self::sized(bytes);
        engine.formats[0].size_estimate = Some(estimate);
        engine
    }

    /// Stretches each fetch by `delay` so tests can observe mid-transfer
    /// state or cancel while bytes are still moving.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// The first `n` fetches fail with a transient network error.
    pub fn flaky(self, n: usize) -> Self {
        self.flaky_fetches.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl ExtractionEngine for StubEngine {
    async fn probe(&self, _url: &Url) -> media_relay::Result<Vec<MediaFormat>> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.formats.clone())
    }

    async fn fetch(
        &self,
        _url: &Url,
        _format_id: &str,
        destination: &Path,
        progress: ProgressFn,
    ) -> media_relay::Result<u64> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .flaky_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Job(JobFailure::Network {
                message: "stubbed connection reset".to_string(),
            }));
        }
        progress(self.artifact_bytes / 2, Some(self.artifact_bytes));
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        tokio::fs::write(destination, vec![0u8; self.artifact_bytes as usize]).await?;
        progress(self.artifact_bytes, Some(self.artifact_bytes));
        Ok(self.artifact_bytes)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Small-tier transport that acknowledges deliveries without moving bytes.
#[derive(Default)]
pub struct RecordingSmallTransport {
    /// Number of completed sends
    pub sends: AtomicUsize,
}

#[async_trait]
impl SmallTransport for RecordingSmallTransport {
    async fn send(
        &self,
        _path: &Path,
        metadata: &UploadMetadata,
    ) -> media_relay::Result<DeliveryId> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryId::new(format!("small-{}-{}", metadata.job_id, n)))
    }

    fn name(&self) -> &str {
        "recording-small"
    }
}

/// Large-tier transport that reports synthetic progress while acknowledging.
#[derive(Default)]
pub struct RecordingLargeTransport {
    /// Number of completed sends
    pub sends: AtomicUsize,
}

#[async_trait]
impl LargeTransport for RecordingLargeTransport {
    async fn send(
        &self,
        _path: &Path,
        metadata: &UploadMetadata,
        progress: ProgressFn,
    ) -> media_relay::Result<DeliveryId> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        progress(metadata.size_bytes / 2, Some(metadata.size_bytes));
        progress(metadata.size_bytes, Some(metadata.size_bytes));
        Ok(DeliveryId::new(format!("large-{}-{}", metadata.job_id, n)))
    }

    fn name(&self) -> &str {
        "recording-large"
    }
}

/// Everything a test needs to drive and inspect one relay instance.
///
/// Keep the harness alive for the duration of the test; dropping it removes
/// the directory the relay stages artifacts under.
pub struct TestHarness {
    /// The relay under test
    pub relay: MediaRelay,
    /// The engine handed to the relay, for call-count assertions
    pub engine: Arc<StubEngine>,
    /// Small-tier transport handed to the relay
    pub small: Arc<RecordingSmallTransport>,
    /// Large-tier transport handed to the relay
    pub large: Arc<RecordingLargeTransport>,
    /// History sink handed to the relay
    pub history: Arc<MemoryHistorySink>,
    /// Root temp directory backing the relay's staging area
    pub temp_dir: TempDir,
}

impl TestHarness {
    /// Directory the relay stages artifacts under.
    pub fn temp_root(&self) -> PathBuf {
        self.relay.get_config().temp_root().clone()
    }
}

/// Baseline config for tests: fast retry pacing, rate limits off, short
/// phase timeouts, temp storage under `root`.
pub fn relay_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.temp.temp_root = root.join("relay-temp");
    config.temp.sweep_on_start = false;
    config.rate_limits.enabled = false;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    config.progress.min_update_interval = Duration::from_millis(20);
    config.timeouts.extraction = Duration::from_secs(5);
    config.timeouts.download = Duration::from_secs(5);
    config.timeouts.upload = Duration::from_secs(5);
    config.timeouts.shutdown = Duration::from_secs(5);
    config
}

/// Start a relay around `engine` with recording transports and an in-memory
/// history sink. `configure` runs on the baseline config before startup.
pub async fn start_relay_with(
    engine: StubEngine,
    configure: impl FnOnce(&mut Config),
) -> TestHarness {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let mut config = relay_config(temp_dir.path());
    configure(&mut config);

    let engine = Arc::new(engine);
    let small = Arc::new(RecordingSmallTransport::default());
    let large = Arc::new(RecordingLargeTransport::default());
    let history = Arc::new(MemoryHistorySink::new());

    let relay = MediaRelay::new(
        config,
        engine.clone(),
        small.clone(),
        large.clone(),
        history.clone(),
    )
    .await
    .expect("start relay");

    TestHarness {
        relay,
        engine,
        small,
        large,
        history,
        temp_dir,
    }
}

/// Start a relay with the baseline config untouched.
pub async fn start_relay(engine: StubEngine) -> TestHarness {
    start_relay_with(engine, |_| {}).await
}

/// Request for `user` against the given source URL.
pub fn request(user: i64, url: &str) -> JobRequest {
    JobRequest {
        user: UserId::new(user),
        url: url.to_string(),
        format_id: None,
        file_name: None,
    }
}
