//! In-process TTL cache for tabular reads.
//!
//! Entries expire lazily: a stale entry is dropped by the `get` that finds it.
//! A background sweeper is available for long-running processes but is not
//! required for correctness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::TabularResult;

/// Error returned by [`TtlCache::set`] for a zero TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTtl;

impl std::fmt::Display for InvalidTtl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache TTL must be greater than zero")
    }
}

impl std::error::Error for InvalidTtl {}

/// A cached value with its creation and expiry time in milliseconds since epoch.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: TabularResult,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Expiring key/value store shared by every reader in the process.
///
/// Construct one per process (or per test) and hand it around in an `Arc`.
#[derive(Default)]
pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn set(&self, key: &str, value: TabularResult, ttl: Duration) -> Result<(), InvalidTtl> {
        self.set_at(key, value, ttl, current_time_ms())
    }

    pub fn set_at(
        &self,
        key: &str,
        value: TabularResult,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<(), InvalidTtl> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if ttl_ms == 0 {
            return Err(InvalidTtl);
        }

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    /// Fetch a fresh value. Returns `None` on a miss or when the entry has expired.
    pub fn get(&self, key: &str) -> Option<TabularResult> {
        self.entry_at(key, current_time_ms()).map(|e| e.value)
    }

    pub fn get_at(&self, key: &str, now_ms: u64) -> Option<TabularResult> {
        self.entry_at(key, now_ms).map(|e| e.value)
    }

    /// Like [`get`](Self::get) but also returns the entry's timestamps.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entry_at(key, current_time_ms())
    }

    pub fn entry_at(&self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now_ms) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove `key` if present.
    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(current_time_ms())
    }

    pub fn purge_expired_at(&self, now_ms: u64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now_ms));
        before - entries.len()
    }

    /// Number of stored entries, including ones that have expired but not yet been evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a background task that purges expired entries every `interval`.
    ///
    /// The task only holds a weak reference and exits once the cache is dropped
    /// or [`shutdown`](Self::shutdown) is called. Must be called inside a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "purged expired cache entries");
                }
            }
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the sweeper (if any) and clear every entry.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.lock().clear();
    }

    // Entries are inserted and removed whole; a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Get current time in milliseconds since epoch.
pub(crate) fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
