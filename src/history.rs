//! Durable sink for finished-job records
//!
//! Every job writes exactly one [`JobRecord`] when it reaches a terminal
//! state. Where that record goes is up to the embedder; the relay itself
//! only knows this trait. Recording is best-effort: a sink error is logged
//! and never changes the job's outcome.

use crate::error::Result;
use crate::types::JobRecord;
use async_trait::async_trait;
use std::sync::Mutex;

/// Receives one record per finished job
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Persists `record`; called exactly once per job
    async fn record(&self, record: &JobRecord) -> Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

/// Sink that discards every record
///
/// For embedders that keep no job history.
#[derive(Debug, Default, Clone)]
pub struct NoOpHistorySink;

impl NoOpHistorySink {
    /// Creates a discarding sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HistorySink for NoOpHistorySink {
    async fn record(&self, _record: &JobRecord) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Sink that keeps records in memory
///
/// Useful in tests and for embedders that expose recent history without a
/// database.
#[derive(Debug, Default)]
pub struct MemoryHistorySink {
    records: Mutex<Vec<JobRecord>>,
}

impl MemoryHistorySink {
    /// Creates an empty in-memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record received so far, in arrival order
    pub fn records(&self) -> Vec<JobRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of records received so far
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// True when no record has been received yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistorySink for MemoryHistorySink {
    async fn record(&self, record: &JobRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, JobOutcome, UserId};
    use chrono::Utc;

    fn sample_record(id: &str, outcome: JobOutcome) -> JobRecord {
        JobRecord {
            job_id: JobId::new(id),
            user: UserId::new(42),
            source_url: "https://example.com/v".to_string(),
            outcome,
            failure_code: None,
            failure_reason: None,
            final_size_bytes: Some(1024),
            checksum_sha256: None,
            transport: None,
            delivery_id: None,
            created_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn noop_sink_accepts_records() {
        let sink = NoOpHistorySink::new();
        sink.record(&sample_record("job-1", JobOutcome::Completed))
            .await
            .unwrap();
        assert_eq!(sink.name(), "noop");
    }

    #[tokio::test]
    async fn memory_sink_keeps_arrival_order() {
        let sink = MemoryHistorySink::new();
        assert!(sink.is_empty());

        sink.record(&sample_record("job-1", JobOutcome::Completed))
            .await
            .unwrap();
        sink.record(&sample_record("job-2", JobOutcome::Failed))
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].job_id.as_str(), "job-1");
        assert_eq!(records[0].outcome, JobOutcome::Completed);
        assert_eq!(records[1].job_id.as_str(), "job-2");
        assert_eq!(records[1].outcome, JobOutcome::Failed);
    }

    #[tokio::test]
    async fn memory_sink_returns_copies() {
        let sink = MemoryHistorySink::new();
        sink.record(&sample_record("job-1", JobOutcome::Cancelled))
            .await
            .unwrap();

        let mut copy = sink.records();
        copy.clear();
        assert_eq!(sink.len(), 1);
    }
}
