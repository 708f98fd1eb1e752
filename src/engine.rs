//! Extraction engine contract
//!
//! The engine is the relay's view of whatever tool understands source sites:
//! it can probe a URL for downloadable formats and fetch one of them to a
//! local path. Implementations live outside this crate; the relay only
//! depends on this trait.

use crate::error::{Error, JobFailure, Result};
use crate::types::MediaFormat;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Progress callback handed to long transfers: `(bytes_done, bytes_total)`
///
/// Must be cheap and non-blocking; callers invoke it from inside the
/// transfer loop.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Probes sources and fetches media from them
///
/// Failures are reported through [`Error::Job`]: `UnsupportedSource` when
/// the site or URL cannot be handled, `Network` for transient connectivity
/// problems, and `Extraction` for permanent source-side failures. The relay
/// applies its own timeouts and cancellation around these calls; an
/// implementation only needs to be drop-safe mid-flight.
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// Probes `url` and returns the formats available for download
    async fn probe(&self, url: &Url) -> Result<Vec<MediaFormat>>;

    /// Fetches the format named by `format_id` into `destination`, calling
    /// `progress` as bytes arrive; returns the number of bytes written
    async fn fetch(
        &self,
        url: &Url,
        format_id: &str,
        destination: &Path,
        progress: ProgressFn,
    ) -> Result<u64>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Normalizes a raw source URL for probing and cache keying
///
/// Trims whitespace, drops the fragment, and accepts only http(s) URLs;
/// anything else is an unsupported source. Two requests differing only in
/// fragment normalize to the same URL and therefore share probe metadata.
pub fn normalize_source_url(raw: &str) -> Result<Url> {
    let unsupported = || {
        Error::Job(JobFailure::UnsupportedSource {
            url: raw.to_string(),
        })
    };
    let mut url = Url::parse(raw.trim()).map_err(|_| unsupported())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unsupported());
    }
    url.set_fragment(None);
    Ok(url)
}

/// Cache key under which probe results for a normalized URL are stored
pub fn probe_cache_key(url: &Url) -> String {
    format!("probe:{:x}", md5::compute(url.as_str()))
}
