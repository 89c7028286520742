//! Cache-first reads that never fail.
//!
//! Lookup order is cache, then live store, then a caller-supplied static
//! default. Every outcome is tagged with where its data came from. Fallback
//! data is never cached, so a transient outage cannot outlive the outage.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cache::{current_time_ms, TtlCache};
use crate::client::TabularStoreClient;
use crate::range::RangeSpec;
use crate::store::{BackingStore, ReadError};
use crate::TabularResult;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the data in a [`FallbackOutcome`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Cache,
    Live,
    StaticFallback,
    ErrorFallback,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Live => "live",
            Source::StaticFallback => "static-fallback",
            Source::ErrorFallback => "error-fallback",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackOutcome {
    pub data: TabularResult,
    pub source: Source,
    /// When this outcome was produced.
    pub timestamp: DateTime<Utc>,
    /// When the cached entry was stored; set only for [`Source::Cache`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl FallbackOutcome {
    fn new(data: TabularResult, source: Source) -> Self {
        Self {
            data,
            source,
            timestamp: Utc::now(),
            cached_at: None,
        }
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, Source::StaticFallback | Source::ErrorFallback)
    }
}

type LiveFetch = Shared<BoxFuture<'static, Result<TabularResult, ReadError>>>;

type InFlight = Arc<Mutex<HashMap<String, (u64, LiveFetch)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves dataset reads through cache, live store, and static default.
///
/// Concurrent misses for one key share a single live fetch.
pub struct FallbackResolver<S> {
    cache: Arc<TtlCache>,
    client: Arc<TabularStoreClient<S>>,
    fetch_timeout: Duration,
    in_flight: InFlight,
    next_flight: AtomicU64,
}

impl<S: BackingStore + 'static> FallbackResolver<S> {
    pub fn new(cache: Arc<TtlCache>, client: Arc<TabularStoreClient<S>>) -> Self {
        Self {
            cache,
            client,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Bound each live fetch; a fetch that overruns degrades to the static default.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<TabularStoreClient<S>> {
        &self.client
    }

    /// Number of live fetches currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Read `key`, falling back to `static_default` when the store has nothing to offer.
    pub async fn get_records(
        &self,
        key: &str,
        spec: &RangeSpec,
        static_default: TabularResult,
        ttl: Duration,
    ) -> FallbackOutcome {
        self.get_records_with(key, spec, || Ok::<_, Infallible>(static_default), ttl)
            .await
    }

    /// Like [`get_records`](Self::get_records), with a default that is only
    /// built when needed and may fail. A failed default yields empty data
    /// tagged [`Source::ErrorFallback`].
    pub async fn get_records_with<F, E>(
        &self,
        key: &str,
        spec: &RangeSpec,
        make_default: F,
        ttl: Duration,
    ) -> FallbackOutcome
    where
        F: FnOnce() -> Result<TabularResult, E>,
        E: std::fmt::Display,
    {
        if let Some(entry) = self.cache.entry(key) {
            debug!(key, rows = entry.value.len(), "cache hit");
            return FallbackOutcome {
                cached_at: DateTime::from_timestamp_millis(entry.created_at_ms as i64),
                ..FallbackOutcome::new(entry.value, Source::Cache)
            };
        }

        match self.fetch_live(key, spec, ttl).await {
            Ok(data) if !data.is_empty() => return FallbackOutcome::new(data, Source::Live),
            Ok(_) => warn!(key, range = %spec, "live read returned no rows, using static default"),
            Err(e) => warn!(key, range = %spec, error = %e, "live read failed, using static default"),
        }

        match make_default() {
            Ok(data) => FallbackOutcome::new(data, Source::StaticFallback),
            Err(e) => {
                error!(key, error = %e, "static default unavailable");
                FallbackOutcome::new(TabularResult::empty(), Source::ErrorFallback)
            }
        }
    }

    /// Join the running fetch for `key`, or start one.
    async fn fetch_live(
        &self,
        key: &str,
        spec: &RangeSpec,
        ttl: Duration,
    ) -> Result<TabularResult, ReadError> {
        let flight = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some((_, flight)) => {
                    debug!(key, "joining in-flight fetch");
                    flight.clone()
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let flight = self.start_fetch(id, key, spec, ttl).shared();
                    in_flight.insert(key.to_string(), (id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// Run the fetch on its own task so it finishes, and warms the cache,
    /// even when every waiter is dropped first.
    fn start_fetch(
        &self,
        id: u64,
        key: &str,
        spec: &RangeSpec,
        ttl: Duration,
    ) -> BoxFuture<'static, Result<TabularResult, ReadError>> {
        let client = self.client.clone();
        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();
        let timeout = self.fetch_timeout;
        let key = key.to_string();
        let spec = spec.clone();
        let registry = self.in_flight.clone();
        let flight_key = key.clone();

        let handle = tokio::spawn(async move {
            let started = current_time_ms();
            let result = match tokio::time::timeout(timeout, client.read(&spec)).await {
                Ok(result) => result,
                Err(_) => Err(ReadError::Timeout(timeout)),
            };

            if let Ok(rows) = &result {
                debug!(
                    key = %key,
                    rows = rows.len(),
                    elapsed_ms = current_time_ms().saturating_sub(started),
                    "live read complete"
                );
                if !rows.is_empty() {
                    if let Err(e) = cache.set(&key, rows.clone(), ttl) {
                        warn!(key = %key, error = %e, "live result not cached");
                    }
                }
            }

            // A later flight may have replaced ours; only remove our own entry.
            {
                let mut in_flight = lock(&in_flight);
                if in_flight.get(&key).is_some_and(|(flight, _)| *flight == id) {
                    in_flight.remove(&key);
                }
            }
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(key = %flight_key, error = %e, "live fetch task failed");
                    let mut in_flight = lock(&registry);
                    if in_flight.get(&flight_key).is_some_and(|(flight, _)| *flight == id) {
                        in_flight.remove(&flight_key);
                    }
                    Err(ReadError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
    }
}
