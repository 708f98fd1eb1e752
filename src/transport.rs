//! Delivery transports and size-based tier selection
//!
//! Finished artifacts leave the relay through one of two transports: a
//! small-payload path for files that fit a direct attachment, and a large
//! path for everything up to the hard ceiling. [`TransportSelector`] is the
//! single place the size thresholds are applied.

use crate::config::TransportConfig;
use crate::engine::ProgressFn;
use crate::error::{JobFailure, Result};
use crate::types::{DeliveryId, JobId, TransportKind, UserId};
use async_trait::async_trait;
use std::path::Path;

/// Details a transport needs to deliver an artifact
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    /// Job that produced the artifact
    pub job_id: JobId,
    /// Requesting user, for attribution at the destination
    pub user: UserId,
    /// File name to present at the destination
    pub file_name: String,
    /// Exact artifact size on disk
    pub size_bytes: u64,
    /// Normalized source URL, for provenance
    pub source_url: String,
}

/// Delivers small artifacts in a single direct send
///
/// Failures are reported as [`crate::Error::Job`] wrapping
/// [`JobFailure::Upload`]; the `transient` flag on that variant decides
/// whether the relay treats the attempt as retryable.
#[async_trait]
pub trait SmallTransport: Send + Sync {
    /// Sends the artifact at `path` and returns the destination's id for it
    async fn send(&self, path: &Path, metadata: &UploadMetadata) -> Result<DeliveryId>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Delivers large artifacts, reporting progress as bytes move
#[async_trait]
pub trait LargeTransport: Send + Sync {
    /// Sends the artifact at `path`, calling `progress` as bytes are
    /// transferred; returns the destination's id for it
    async fn send(
        &self,
        path: &Path,
        metadata: &UploadMetadata,
        progress: ProgressFn,
    ) -> Result<DeliveryId>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Maps an artifact size to a transport tier
///
/// Pure and synchronous; both boundaries are inclusive. A size exactly at
/// the small limit still goes small, a size exactly at the ceiling still
/// goes large, and anything past the ceiling is refused outright.
#[derive(Debug, Clone, Copy)]
pub struct TransportSelector {
    small_limit: u64,
    ceiling: u64,
}

impl TransportSelector {
    /// Builds a selector from the configured size thresholds
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            small_limit: config.small_transport_limit,
            ceiling: config.large_transport_limit,
        }
    }

    /// Picks the transport tier for `size_bytes`
    pub fn select(&self, size_bytes: u64) -> std::result::Result<TransportKind, JobFailure> {
        if size_bytes <= self.small_limit {
            Ok(TransportKind::Small)
        } else if size_bytes <= self.ceiling {
            Ok(TransportKind::Large)
        } else {
            Err(JobFailure::TooLarge {
                size_bytes,
                limit_bytes: self.ceiling,
            })
        }
    }

    /// Largest size the small transport accepts
    pub fn small_limit(&self) -> u64 {
        self.small_limit
    }

    /// Largest size any transport accepts
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn default_selector() -> TransportSelector {
        TransportSelector::new(&TransportConfig::default())
    }

    #[test]
    fn small_sizes_select_small_transport() {
        let selector = default_selector();
        assert_eq!(selector.select(0).unwrap(), TransportKind::Small);
        assert_eq!(selector.select(1024).unwrap(), TransportKind::Small);
        assert_eq!(
            selector.select(49 * 1024 * 1024).unwrap(),
            TransportKind::Small
        );
    }

    #[test]
    fn boundary_at_small_limit_is_inclusive() {
        let selector = default_selector();
        let limit = selector.small_limit();
        assert_eq!(selector.select(limit).unwrap(), TransportKind::Small);
        assert_eq!(selector.select(limit + 1).unwrap(), TransportKind::Large);
    }

    #[test]
    fn boundary_at_ceiling_is_inclusive() {
        let selector = default_selector();
        let ceiling = selector.ceiling();
        assert_eq!(selector.select(ceiling).unwrap(), TransportKind::Large);
        let err = selector.select(ceiling + 1).unwrap_err();
        match err {
            JobFailure::TooLarge {
                size_bytes,
                limit_bytes,
            } => {
                assert_eq!(size_bytes, ceiling + 1);
                assert_eq!(limit_bytes, ceiling);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn oversize_reports_the_ceiling_not_the_small_limit() {
        let selector = default_selector();
        let three_gib = 3 * 1024 * 1024 * 1024;
        match selector.select(three_gib).unwrap_err() {
            JobFailure::TooLarge { limit_bytes, .. } => {
                assert_eq!(limit_bytes, selector.ceiling());
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn custom_thresholds_are_honored() {
        let selector = TransportSelector::new(&TransportConfig {
            small_transport_limit: 100,
            large_transport_limit: 1000,
        });
        assert_eq!(selector.select(100).unwrap(), TransportKind::Small);
        assert_eq!(selector.select(101).unwrap(), TransportKind::Large);
        assert_eq!(selector.select(1000).unwrap(), TransportKind::Large);
        assert!(selector.select(1001).is_err());
    }
}
