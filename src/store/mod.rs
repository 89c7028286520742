//! Backing store boundary: the remote tabular store the cache sits in front of.

mod error;
pub mod http;
pub mod memory;

pub use error::{BlankError, ReadError, StoreDeleteError, StoreError, StoreWriteError};
pub use http::SheetsHttpStore;
pub use memory::MemoryStore;

use serde::Serialize;
use std::sync::Arc;

use crate::range::{RegionDescriptor, WireRange};
use crate::TabularResult;

/// Acknowledgement of a persisted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub updated_range: String,
    pub updated_rows: usize,
}

/// Operations the remote tabular store exposes.
///
/// Every call is addressed by `store_id` (a spreadsheet id for Google Sheets).
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync {
    async fn get_values(&self, store_id: &str, range: &WireRange)
        -> Result<TabularResult, StoreError>;

    /// Overwrite `range` with `rows` exactly as given.
    async fn update_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError>;

    /// Append `rows` after the last data row of the table at `range`.
    async fn append_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError>;

    async fn region_metadata(&self, store_id: &str) -> Result<Vec<RegionDescriptor>, StoreError>;

    /// Remove rows `[start, end)` (0-based) and shift later rows up.
    async fn delete_rows(
        &self,
        store_id: &str,
        stable_id: i64,
        start: u32,
        end: u32,
    ) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: BackingStore + ?Sized> BackingStore for Arc<S> {
    async fn get_values(
        &self,
        store_id: &str,
        range: &WireRange,
    ) -> Result<TabularResult, StoreError> {
        (**self).get_values(store_id, range).await
    }

    async fn update_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        (**self).update_values(store_id, range, rows).await
    }

    async fn append_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        (**self).append_values(store_id, range, rows).await
    }

    async fn region_metadata(&self, store_id: &str) -> Result<Vec<RegionDescriptor>, StoreError> {
        (**self).region_metadata(store_id).await
    }

    async fn delete_rows(
        &self,
        store_id: &str,
        stable_id: i64,
        start: u32,
        end: u32,
    ) -> Result<(), StoreError> {
        (**self).delete_rows(store_id, stable_id, start, end).await
    }
}
