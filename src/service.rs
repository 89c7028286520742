//! Caller-facing record operations.
//!
//! Reads go through the [`FallbackResolver`] and never fail; writes and
//! deletes go straight to the store and report every failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::client::{Deleted, TabularStoreClient};
use crate::config::{Config, DatasetConfig};
use crate::fallback::{FallbackOutcome, FallbackResolver};
use crate::range::{RangeSpec, RegionDescriptor};
use crate::store::{Ack, BackingStore, StoreDeleteError, StoreError, StoreWriteError};
use crate::TabularResult;

/// `get_dataset` was asked for a name that is not in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDataset(pub String);

impl std::fmt::Display for UnknownDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown dataset '{}'", self.0)
    }
}

impl std::error::Error for UnknownDataset {}

pub struct RecordService<S> {
    resolver: FallbackResolver<S>,
    datasets: BTreeMap<String, DatasetConfig>,
}

impl<S: BackingStore + 'static> RecordService<S> {
    pub fn new(resolver: FallbackResolver<S>) -> Self {
        Self {
            resolver,
            datasets: BTreeMap::new(),
        }
    }

    /// Wire a service from configuration: store id, fetch timeout, and dataset catalogue.
    pub fn from_config(store: S, cache: Arc<TtlCache>, config: &Config) -> Self {
        let client = TabularStoreClient::new(store, config.spreadsheet_id.clone());
        let resolver = FallbackResolver::new(cache, Arc::new(client))
            .with_fetch_timeout(config.fetch_timeout());
        Self::new(resolver).with_datasets(config.datasets.clone())
    }

    pub fn with_datasets(mut self, datasets: BTreeMap<String, DatasetConfig>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn datasets(&self) -> impl Iterator<Item = (&str, &DatasetConfig)> {
        self.datasets.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub fn resolver(&self) -> &FallbackResolver<S> {
        &self.resolver
    }

    pub async fn get_records(
        &self,
        dataset_key: &str,
        spec: &RangeSpec,
        static_default: TabularResult,
        ttl: Duration,
    ) -> FallbackOutcome {
        let outcome = self
            .resolver
            .get_records(dataset_key, spec, static_default, ttl)
            .await;
        debug!(
            key = dataset_key,
            source = outcome.source.as_str(),
            rows = outcome.count(),
            "records served"
        );
        outcome
    }

    /// Read a catalogued dataset by name, using its configured range, TTL and defaults.
    pub async fn get_dataset(&self, name: &str) -> Result<FallbackOutcome, UnknownDataset> {
        let dataset = self
            .datasets
            .get(name)
            .ok_or_else(|| UnknownDataset(name.to_string()))?;

        Ok(self
            .resolver
            .get_records_with(
                name,
                &dataset.spec(),
                || Ok::<_, std::convert::Infallible>(dataset.default_rows()),
                dataset.ttl(),
            )
            .await)
    }

    pub async fn write_records(
        &self,
        spec: &RangeSpec,
        rows: &TabularResult,
    ) -> Result<Ack, StoreWriteError> {
        self.resolver
            .client()
            .write(&spec.direct_range(), rows)
            .await
    }

    pub async fn append_records(
        &self,
        spec: &RangeSpec,
        rows: &TabularResult,
    ) -> Result<Ack, StoreWriteError> {
        self.resolver.client().append(spec, rows).await
    }

    pub async fn delete_record(&self, region: &str, row: u32) -> Result<Deleted, StoreDeleteError> {
        self.resolver.client().delete_row(region, row).await
    }

    pub async fn regions(&self) -> Result<Vec<RegionDescriptor>, StoreError> {
        self.resolver.client().regions().await
    }

    /// Drop the cached copy of a dataset so the next read goes live.
    pub fn invalidate(&self, dataset_key: &str) {
        self.resolver.cache().delete(dataset_key);
        info!(key = dataset_key, "cache entry invalidated");
    }
}
