//! In-process [`BackingStore`] that mimics the Sheets API closely enough to
//! exercise range escalation, both delete strategies, and outages.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Ack, BackingStore, StoreError};
use crate::range::{CellRange, RegionDescriptor, WireRange};
use crate::table::Row;
use crate::TabularResult;

/// One call made against a [`MemoryStore`], recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetValues(String),
    UpdateValues(String),
    AppendValues(String),
    RegionMetadata,
    DeleteRows { stable_id: i64, start: u32, end: u32 },
}

struct Region {
    title: String,
    stable_id: i64,
    rows: Vec<Row>,
}

#[derive(Default)]
struct State {
    regions: Vec<Region>,
    requests: Vec<Request>,
    unreachable: bool,
    refuse_structural_delete: bool,
}

/// Spreadsheet held in memory, addressed by a single store id.
pub struct MemoryStore {
    store_id: String,
    latency: Mutex<Option<Duration>>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            latency: Mutex::new(None),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_region(self, title: &str, stable_id: i64, rows: TabularResult) -> Self {
        self.add_region(title, stable_id, rows);
        self
    }

    pub fn add_region(&self, title: &str, stable_id: i64, rows: TabularResult) {
        let mut state = self.lock();
        state.regions.retain(|r| r.title != title);
        state.regions.push(Region {
            title: title.to_string(),
            stable_id,
            rows: rows.into_rows(),
        });
    }

    /// Current contents of a region, untrimmed.
    pub fn rows(&self, title: &str) -> Option<Vec<Row>> {
        self.lock()
            .regions
            .iter()
            .find(|r| r.title == title)
            .map(|r| r.rows.clone())
    }

    /// Make every call fail with a network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Reject structural row deletes, as a store without that permission would.
    pub fn refuse_structural_delete(&self, refuse: bool) {
        self.lock().refuse_structural_delete = refuse;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Number of value reads issued so far.
    pub fn read_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| matches!(r, Request::GetValues(_)))
            .count()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, store_id: &str, request: Request) -> Result<(), StoreError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.requests.push(request);
        if state.unreachable {
            return Err(StoreError::Network("connection refused".to_string()));
        }
        if store_id != self.store_id {
            return Err(StoreError::Api {
                status: 404,
                message: "Requested entity was not found.".to_string(),
            });
        }
        Ok(())
    }
}

fn unparseable(range: &WireRange) -> StoreError {
    StoreError::RangeParse(format!("Unable to parse range: {}", range))
}

/// Parse the region part of an A1 range the way the Sheets API does.
///
/// Quoted names use single quotes with `''` as an escaped apostrophe; unquoted
/// names may only contain ASCII letters, digits and underscores.
fn parse_region_name(region: &str) -> Option<String> {
    if let Some(inner) = region
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        let unescaped = inner.replace("''", "\u{0}");
        if unescaped.contains('\'') || unescaped.is_empty() {
            return None;
        }
        return Some(unescaped.replace('\u{0}', "'"));
    }

    if !region.is_empty() && region.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(region.to_string())
    } else {
        None
    }
}

/// Locate the region index and cell bounds a wire range refers to.
fn locate(state: &State, range: &WireRange) -> Result<(usize, CellRange), StoreError> {
    match range {
        WireRange::A1(a1) => {
            let (region, cells) = match a1.rsplit_once('!') {
                Some((region, cells)) => (region, cells),
                None => (a1.as_str(), ""),
            };
            let title = parse_region_name(region).ok_or_else(|| unparseable(range))?;
            let cells = CellRange::parse(cells).map_err(|_| unparseable(range))?;
            let idx = state
                .regions
                .iter()
                .position(|r| r.title == title)
                .ok_or_else(|| unparseable(range))?;
            Ok((idx, cells))
        }
        WireRange::ById { region_id, cells } => {
            let idx = state
                .regions
                .iter()
                .position(|r| r.stable_id == *region_id)
                .ok_or_else(|| StoreError::Api {
                    status: 400,
                    message: format!("No grid with id: {}", region_id),
                })?;
            Ok((idx, cells.clone()))
        }
    }
}

fn bound(value: Option<u32>, default: usize) -> usize {
    value.map(|v| v as usize).unwrap_or(default)
}

fn slice(rows: &[Row], cells: &CellRange) -> Vec<Row> {
    let start_row = bound(cells.start_row, 0);
    let end_row = bound(cells.end_row, rows.len()).min(rows.len());

    let mut out: Vec<Row> = rows
        .get(start_row..end_row.max(start_row))
        .unwrap_or_default()
        .iter()
        .map(|row| {
            let start_col = bound(cells.start_col, 0);
            let end_col = bound(cells.end_col, row.len()).min(row.len());
            let mut cells: Row = row
                .get(start_col..end_col.max(start_col))
                .unwrap_or_default()
                .to_vec();
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();

    // Trailing empty rows are omitted; empty rows in the middle come back as `[]`.
    while out.last().is_some_and(|r| r.is_empty()) {
        out.pop();
    }
    out
}

fn write_at(rows: &mut Vec<Row>, top: usize, left: usize, values: &TabularResult) {
    for (i, row) in values.rows().iter().enumerate() {
        let target_row = top + i;
        if rows.len() <= target_row {
            rows.resize_with(target_row + 1, Vec::new);
        }
        let target = &mut rows[target_row];
        for (j, cell) in row.iter().enumerate() {
            let col = left + j;
            if target.len() <= col {
                target.resize(col + 1, String::new());
            }
            target[col] = cell.clone();
        }
    }
}

#[async_trait::async_trait]
impl BackingStore for MemoryStore {
    async fn get_values(
        &self,
        store_id: &str,
        range: &WireRange,
    ) -> Result<TabularResult, StoreError> {
        self.enter(store_id, Request::GetValues(range.to_string()))
            .await?;
        let state = self.lock();
        let (idx, cells) = locate(&state, range)?;
        Ok(TabularResult::new(slice(&state.regions[idx].rows, &cells)))
    }

    async fn update_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        self.enter(store_id, Request::UpdateValues(range.to_string()))
            .await?;
        let mut state = self.lock();
        let (idx, cells) = locate(&state, range)?;

        let top = bound(cells.start_row, 0);
        let left = bound(cells.start_col, 0);
        if let Some(end) = cells.end_row {
            if top + rows.len() > end as usize {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!("Requested writing within range {}, but tried writing to more rows", range),
                });
            }
        }
        if let Some(end) = cells.end_col {
            let widest = rows.rows().iter().map(|r| r.len()).max().unwrap_or(0);
            if left + widest > end as usize {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!("Requested writing within range {}, but tried writing to more columns", range),
                });
            }
        }

        write_at(&mut state.regions[idx].rows, top, left, rows);
        Ok(Ack {
            updated_range: range.to_string(),
            updated_rows: rows.len(),
        })
    }

    async fn append_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        self.enter(store_id, Request::AppendValues(range.to_string()))
            .await?;
        let mut state = self.lock();
        let (idx, cells) = locate(&state, range)?;

        let region = &mut state.regions[idx];
        let last_data_row = region
            .rows
            .iter()
            .rposition(|r| r.iter().any(|c| !c.is_empty()))
            .map(|i| i + 1)
            .unwrap_or(0);
        region.rows.truncate(last_data_row);
        write_at(&mut region.rows, last_data_row, bound(cells.start_col, 0), rows);

        Ok(Ack {
            updated_range: range.to_string(),
            updated_rows: rows.len(),
        })
    }

    async fn region_metadata(&self, store_id: &str) -> Result<Vec<RegionDescriptor>, StoreError> {
        self.enter(store_id, Request::RegionMetadata).await?;
        Ok(self
            .lock()
            .regions
            .iter()
            .map(|r| RegionDescriptor {
                title: r.title.clone(),
                stable_id: r.stable_id,
            })
            .collect())
    }

    async fn delete_rows(
        &self,
        store_id: &str,
        stable_id: i64,
        start: u32,
        end: u32,
    ) -> Result<(), StoreError> {
        self.enter(
            store_id,
            Request::DeleteRows {
                stable_id,
                start,
                end,
            },
        )
        .await?;
        let mut state = self.lock();
        if state.refuse_structural_delete {
            return Err(StoreError::Auth(
                "The caller does not have permission to delete rows".to_string(),
            ));
        }

        let region = state
            .regions
            .iter_mut()
            .find(|r| r.stable_id == stable_id)
            .ok_or_else(|| StoreError::Api {
                status: 400,
                message: format!("No grid with id: {}", stable_id),
            })?;
        if start >= end {
            return Err(StoreError::Api {
                status: 400,
                message: "startIndex must be less than endIndex".to_string(),
            });
        }

        let len = region.rows.len();
        let start = (start as usize).min(len);
        let end = (end as usize).min(len);
        region.rows.drain(start..end);
        Ok(())
    }
}
