//! Shared in-memory TTL cache
//!
//! A process-local key/value store with per-entry expiry, used for probed
//! source metadata and progress snapshots. The cache is advisory: callers
//! must behave correctly on a miss, and a value disappearing early is never
//! an error. Values are stored as JSON so unrelated subsystems can share one
//! store without sharing types.

use crate::error::Result;
use crate::types::CacheStats;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct CacheEntry {
    value: serde_json::Value,
    /// None means the entry never expires
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct CacheInner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

/// Cloneable handle to the shared TTL cache
///
/// All clones see the same entries. Expired entries are dropped lazily on
/// access and in bulk by [`sweep`](CacheStore::sweep).
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl CacheStore {
    /// Creates an empty store; `default_ttl` applies to writes that do not
    /// specify their own
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                default_ttl,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                sets: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the live value under `key`, or `None` on a miss or expiry
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                entries.remove(key);
                self.inner.expirations.fetch_add(1, Ordering::Relaxed);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value` under `key`, replacing any previous entry
    ///
    /// `ttl` of `None` uses the store's default. A zero TTL effectively
    /// writes an already-expired entry.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.inner.default_ttl);
        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        let mut entries = self.inner.entries.lock().await;
        entries.insert(key.into(), entry);
        self.inner.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Typed read: deserializes the cached JSON into `T`
    ///
    /// An entry that no longer matches the expected shape is treated as a
    /// miss and dropped, so a schema change cannot wedge a key forever.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(key, error = %e, "Dropping cache entry with stale shape");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Typed write: serializes `value` to JSON and stores it
    pub async fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let json = serde_json::to_value(value)?;
        self.set(key, json, ttl).await;
        Ok(())
    }

    /// Removes `key` immediately; returns whether an entry was present
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.entries.lock().await.remove(key).is_some();
        if removed {
            self.inner.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Drops every expired entry; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.inner
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            tracing::debug!(removed, remaining = entries.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Number of entries currently held, including not-yet-swept expired ones
    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the store's counters
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await as u64,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            sets: self.inner.sets.load(Ordering::Relaxed),
            invalidations: self.inner.invalidations.load(Ordering::Relaxed),
            expirations: self.inner.expirations.load(Ordering::Relaxed),
        }
    }
}
