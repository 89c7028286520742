//! Range-aware client over a [`BackingStore`].
//!
//! Reads escalate through the range strategies; writes go out verbatim; row
//! deletes try a structural delete and fall back to blanking the row.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::range::{
    column_letters, wire_range, CellRange, RangeNameResolver, RangeSpec, RegionDescriptor,
    RegionMetadata, Strategy, WireRange,
};
use crate::store::{
    Ack, BackingStore, BlankError, ReadError, StoreDeleteError, StoreError, StoreWriteError,
};
use crate::TabularResult;

/// How a row delete was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Deleted {
    /// The row was removed and later rows moved up.
    Structural,
    /// The row is still there, overwritten with empty cells.
    Blanked,
}

impl Deleted {
    pub fn as_str(&self) -> &'static str {
        match self {
            Deleted::Structural => "structural",
            Deleted::Blanked => "blanked",
        }
    }
}

/// Client bound to one store identifier.
///
/// A client built without a store identifier still works: every call fails
/// with [`StoreError::NotConfigured`].
pub struct TabularStoreClient<S> {
    store: S,
    store_id: Option<String>,
}

struct StoreMetadata<'a, S> {
    store: &'a S,
    store_id: &'a str,
}

#[async_trait::async_trait]
impl<'a, S: BackingStore> RegionMetadata for StoreMetadata<'a, S> {
    async fn regions(&self) -> Result<Vec<RegionDescriptor>, StoreError> {
        self.store.region_metadata(self.store_id).await
    }
}

impl<S: BackingStore> TabularStoreClient<S> {
    pub fn new(store: S, store_id: Option<String>) -> Self {
        let store_id = store_id.filter(|id| !id.trim().is_empty());
        if store_id.is_none() {
            warn!("no store identifier configured, every store call will fail");
        }
        Self { store, store_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_configured(&self) -> bool {
        self.store_id.is_some()
    }

    fn store_id(&self) -> Result<&str, StoreError> {
        self.store_id.as_deref().ok_or(StoreError::NotConfigured)
    }

    /// Read a range, escalating through [`Strategy::ESCALATION`] on range-parse errors.
    pub async fn read(&self, spec: &RangeSpec) -> Result<TabularResult, ReadError> {
        let (_, _, rows) = self.read_resolved(spec).await?;
        Ok(rows)
    }

    /// Read a range and report which wire range the store accepted.
    async fn read_resolved(
        &self,
        spec: &RangeSpec,
    ) -> Result<(Strategy, WireRange, TabularResult), ReadError> {
        let store_id = self.store_id()?;
        let metadata = StoreMetadata {
            store: &self.store,
            store_id,
        };
        let resolver = RangeNameResolver::new(&metadata);

        let (strategy, (wire, rows)) = resolver
            .resolve(spec, |_, wire| async move {
                let result = self.store.get_values(store_id, &wire).await;
                result.map(|rows| (wire, rows))
            })
            .await?;

        debug!(
            range = %spec,
            strategy = strategy.as_str(),
            rows = rows.len(),
            "range read"
        );
        Ok((strategy, wire, rows))
    }

    /// Overwrite `range` with `rows` exactly as given. Not retried.
    pub async fn write(&self, range: &WireRange, rows: &TabularResult) -> Result<Ack, StoreWriteError> {
        let write_error = |source| StoreWriteError {
            range: range.to_string(),
            source,
        };
        let store_id = self.store_id().map_err(write_error)?;

        let ack = self
            .store
            .update_values(store_id, range, rows)
            .await
            .map_err(write_error)?;

        info!(range = %range, rows = rows.len(), "rows written");
        Ok(ack)
    }

    /// Append `rows` after the last data row of the table at `spec`.
    pub async fn append(&self, spec: &RangeSpec, rows: &TabularResult) -> Result<Ack, StoreWriteError> {
        let range = spec.direct_range();
        let write_error = |source| StoreWriteError {
            range: range.to_string(),
            source,
        };
        let store_id = self.store_id().map_err(write_error)?;

        let ack = self
            .store
            .append_values(store_id, &range, rows)
            .await
            .map_err(write_error)?;

        info!(range = %range, rows = rows.len(), updated = %ack.updated_range, "rows appended");
        Ok(ack)
    }

    pub async fn regions(&self) -> Result<Vec<RegionDescriptor>, StoreError> {
        let store_id = self.store_id()?;
        self.store.region_metadata(store_id).await
    }

    /// Delete a 1-based row from `region`.
    ///
    /// Tries a structural delete first. If that fails for any reason the row is
    /// overwritten with as many empty cells as the header row has columns.
    pub async fn delete_row(&self, region: &str, row: u32) -> Result<Deleted, StoreDeleteError> {
        if row == 0 {
            return Err(StoreDeleteError::InvalidRow {
                region: region.to_string(),
                row,
            });
        }

        let structural = match self.delete_structural(region, row).await {
            Ok(()) => {
                info!(region, row, "row deleted");
                return Ok(Deleted::Structural);
            }
            Err(e) => {
                warn!(region, row, error = %e, "structural delete failed, blanking row instead");
                e
            }
        };

        match self.blank_row(region, row).await {
            Ok(ack) => {
                info!(region, row, range = %ack.updated_range, "row blanked");
                Ok(Deleted::Blanked)
            }
            Err(blank) => Err(StoreDeleteError::Failed {
                region: region.to_string(),
                row,
                structural,
                blank,
            }),
        }
    }

    async fn delete_structural(&self, region: &str, row: u32) -> Result<(), ReadError> {
        let store_id = self.store_id()?;
        let metadata = StoreMetadata {
            store: &self.store,
            store_id,
        };
        // Always by stable id, never by a display-name lookup.
        let stable_id = RangeNameResolver::new(&metadata)
            .resolve_region_id(region)
            .await?;

        self.store
            .delete_rows(store_id, stable_id, row - 1, row)
            .await?;
        Ok(())
    }

    async fn blank_row(&self, region: &str, row: u32) -> Result<Ack, BlankError> {
        let header_spec = RangeSpec::new(region, "1:1");
        let (strategy, header_wire, header) = self
            .read_resolved(&header_spec)
            .await
            .map_err(BlankError::HeaderRead)?;

        let columns = header.header().map(|h| h.len()).unwrap_or(0);
        if columns == 0 {
            return Err(BlankError::EmptyHeader);
        }

        let cells = format!("A{}:{}{}", row, column_letters(columns as u32 - 1), row);
        let target = header_spec.with_cells(cells.as_str());
        // Address the row the same way the header read was accepted.
        let range = match (strategy, header_wire) {
            (_, WireRange::ById { region_id, .. }) => WireRange::ById {
                region_id,
                cells: CellRange::parse(&cells).map_err(|e| {
                    BlankError::Write(StoreWriteError {
                        range: target.to_string(),
                        source: StoreError::RangeParse(e),
                    })
                })?,
            },
            (strategy, WireRange::A1(_)) => {
                wire_range(&target, strategy).unwrap_or_else(|| target.direct_range())
            }
        };

        let blank = TabularResult::new(vec![vec![String::new(); columns]]);
        self.write(&range, &blank).await.map_err(BlankError::Write)
    }
}
