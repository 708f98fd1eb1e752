//! Shared test helpers for creating MediaRelay instances with mock
//! collaborators.

use crate::config::Config;
use crate::engine::{ExtractionEngine, ProgressFn};
use crate::error::{Error, JobFailure, Result};
use crate::history::MemoryHistorySink;
use crate::relay::MediaRelay;
use crate::transport::{LargeTransport, SmallTransport, UploadMetadata};
use crate::types::{DeliveryId, JobId, JobRequest, MediaFormat, UserId};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use url::Url;

/// Scripted extraction engine.
///
/// Counts calls and can be told to fail the first N probes or fetches with
/// a transient network error before succeeding.
pub(crate) struct MockEngine {
    pub(crate) formats: Vec<MediaFormat>,
    pub(crate) fetch_bytes: u64,
    pub(crate) fetch_delay: Duration,
    pub(crate) probe_network_failures: AtomicUsize,
    pub(crate) fetch_network_failures: AtomicUsize,
    pub(crate) probe_unsupported: bool,
    pub(crate) probe_calls: AtomicUsize,
    pub(crate) fetch_calls: AtomicUsize,
    /// Format id the most recent fetch was asked for
    pub(crate) last_format: std::sync::Mutex<Option<String>>,
}

impl MockEngine {
    /// Engine that probes one format and fetches `bytes` bytes successfully
    pub(crate) fn ok(bytes: u64) -> Self {
        Self {
            formats: vec![MediaFormat {
                format_id: "best".to_string(),
                container: Some("mp4".to_string()),
                size_estimate: Some(bytes),
            }],
            fetch_bytes: bytes,
            fetch_delay: Duration::ZERO,
            probe_network_failures: AtomicUsize::new(0),
            fetch_network_failures: AtomicUsize::new(0),
            probe_unsupported: false,
            probe_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            last_format: std::sync::Mutex::new(None),
        }
    }

    pub(crate) fn with_formats(mut self, formats: Vec<MediaFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// First `n` fetches fail with a transient network error
    pub(crate) fn failing_fetches(self, n: usize) -> Self {
        self.fetch_network_failures.store(n, Ordering::SeqCst);
        self
    }

    /// First `n` probes fail with a transient network error
    pub(crate) fn failing_probes(self, n: usize) -> Self {
        self.probe_network_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Every probe fails as an unsupported source
    pub(crate) fn unsupported(mut self) -> Self {
        self.probe_unsupported = true;
        self
    }

    /// Fetch pauses for `delay` mid-transfer (for cancellation and timeout
    /// tests)
    pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExtractionEngine for MockEngine {
    async fn probe(&self, url: &Url) -> Result<Vec<MediaFormat>> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_unsupported {
            return Err(Error::Job(JobFailure::UnsupportedSource {
                url: url.to_string(),
            }));
        }
        if Self::take_failure(&self.probe_network_failures) {
            return Err(Error::Job(JobFailure::Network {
                message: "simulated probe failure".to_string(),
            }));
        }
        Ok(self.formats.clone())
    }

    async fn fetch(
        &self,
        _url: &Url,
        format_id: &str,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_format.lock() {
            *last = Some(format_id.to_string());
        }
        if Self::take_failure(&self.fetch_network_failures) {
            return Err(Error::Job(JobFailure::Network {
                message: "simulated fetch failure".to_string(),
            }));
        }

        progress(self.fetch_bytes / 2, Some(self.fetch_bytes));
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        tokio::fs::write(destination, vec![0u8; self.fetch_bytes as usize]).await?;
        progress(self.fetch_bytes, Some(self.fetch_bytes));
        Ok(self.fetch_bytes)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Counting small transport; can fail the first N sends
pub(crate) struct MockSmallTransport {
    pub(crate) sends: AtomicUsize,
    pub(crate) failures: AtomicUsize,
    pub(crate) delay: Duration,
}

impl MockSmallTransport {
    pub(crate) fn ok() -> Self {
        Self {
            sends: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// First `n` sends fail with a permanent upload error
    pub(crate) fn failing_sends(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SmallTransport for MockSmallTransport {
    async fn send(&self, _path: &Path, metadata: &UploadMetadata) -> Result<DeliveryId> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if MockEngine::take_failure(&self.failures) {
            return Err(Error::Job(JobFailure::Upload {
                message: "simulated small send failure".to_string(),
                transient: false,
            }));
        }
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryId::new(format!(
            "small-{}-{n}",
            metadata.job_id.as_str()
        )))
    }

    fn name(&self) -> &str {
        "mock-small"
    }
}

/// Counting large transport; reports progress as it "sends"
pub(crate) struct MockLargeTransport {
    pub(crate) sends: AtomicUsize,
}

impl MockLargeTransport {
    pub(crate) fn ok() -> Self {
        Self {
            sends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LargeTransport for MockLargeTransport {
    async fn send(
        &self,
        _path: &Path,
        metadata: &UploadMetadata,
        progress: ProgressFn,
    ) -> Result<DeliveryId> {
        progress(metadata.size_bytes / 2, Some(metadata.size_bytes));
        progress(metadata.size_bytes, Some(metadata.size_bytes));
        let n = self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryId::new(format!(
            "large-{}-{n}",
            metadata.job_id.as_str()
        )))
    }

    fn name(&self) -> &str {
        "mock-large"
    }
}

/// A relay wired to mocks, plus handles to inspect them
pub(crate) struct TestRelay {
    pub(crate) relay: MediaRelay,
    pub(crate) engine: Arc<MockEngine>,
    pub(crate) small: Arc<MockSmallTransport>,
    pub(crate) large: Arc<MockLargeTransport>,
    pub(crate) history: Arc<MemoryHistorySink>,
    /// Owns the temp root; dropping it removes everything
    pub(crate) _temp: tempfile::TempDir,
}

/// Configuration with small limits and short waits, rooted in `root`
pub(crate) fn fast_config(root: &Path) -> Config {
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

/// Build a relay around the given engine, with mock transports and an
/// in-memory history sink
pub(crate) async fn create_test_relay(
    engine: MockEngine,
    configure: impl FnOnce(&mut Config),
) -> TestRelay {
    create_test_relay_with(engine, MockSmallTransport::ok(), configure).await
}

/// Same as [`create_test_relay`] but with a caller-supplied small transport
pub(crate) async fn create_test_relay_with(
    engine: MockEngine,
    small: MockSmallTransport,
    configure: impl FnOnce(&mut Config),
) -> TestRelay {
    let temp = tempdir().unwrap();
    let mut config = fast_config(temp.path());
    configure(&mut config);

    let engine = Arc::new(engine);
    let small = Arc::new(small);
    let large = Arc::new(MockLargeTransport::ok());
    let history = Arc::new(MemoryHistorySink::new());

    let relay = MediaRelay::new(
        config,
        engine.clone(),
        small.clone(),
        large.clone(),
        history.clone(),
    )
    .await
    .unwrap();

    TestRelay {
        relay,
        engine,
        small,
        large,
        history,
        _temp: temp,
    }
}

/// Request for `user` pointing at a unique test URL
pub(crate) fn request(user: i64, url: &str) -> JobRequest {
    JobRequest {
        user: UserId::new(user),
        url: url.to_string(),
        format_id: None,
        file_name: None,
    }
}

/// Block until the job leaves the active registry
pub(crate) async fn wait_until_settled(relay: &MediaRelay, id: &JobId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let active = relay.active_jobs().await;
            if !active.iter().any(|(jid, _)| jid == id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job should settle within 5s");
}
