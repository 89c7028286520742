//! Google Sheets v4 REST implementation of [`BackingStore`].
//!
//! Credentials are not handled here: the store is given a bearer token (or none,
//! for public sheets and local mocks).

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, error};

use super::{Ack, BackingStore, StoreError};
use crate::range::{CellRange, RegionDescriptor, WireRange};
use crate::TabularResult;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const VALUE_INPUT_OPTION: &str = "USER_ENTERED";

/// Google Sheets API client
pub struct SheetsHttpStore {
    client: Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetByFilterResponse {
    #[serde(default)]
    value_ranges: Vec<MatchedValueRange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedValueRange {
    value_range: ValueRange,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    updated_range: String,
    #[serde(default)]
    updated_rows: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateByFilterResponse {
    #[serde(default)]
    total_updated_rows: usize,
    #[serde(default)]
    responses: Vec<UpdateResponse>,
}

#[derive(Deserialize)]
struct AppendResponse {
    updates: UpdateResponse,
}

#[derive(Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// `GridRange` in the Sheets API; unbounded sides are omitted.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GridRange {
    sheet_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_row_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_row_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_column_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_column_index: Option<u32>,
}

impl GridRange {
    fn new(sheet_id: i64, cells: &CellRange) -> Self {
        Self {
            sheet_id,
            start_row_index: cells.start_row,
            end_row_index: cells.end_row,
            start_column_index: cells.start_col,
            end_column_index: cells.end_col,
        }
    }
}

impl SheetsHttpStore {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent("sheetcache")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn spreadsheet_url(&self, store_id: &str) -> String {
        format!("{}/spreadsheets/{}", self.api_base, store_id)
    }

    fn values_url(&self, store_id: &str, a1: &str) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url(store_id),
            urlencoding::encode(a1)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a JSON body, classifying any failure.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            error!(what, status, message = %message, "sheets API returned error status");
            return Err(StoreError::from_status(status, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(format!("{}: {}", what, e)))
    }
}

fn cell_to_string(cell: JsonValue) -> String {
    match cell {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn into_table(values: Vec<Vec<JsonValue>>) -> TabularResult {
    TabularResult::new(
        values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect(),
    )
}

#[async_trait::async_trait]
impl BackingStore for SheetsHttpStore {
    #[tracing::instrument(name = "sheets_get_values", skip(self, range), fields(range = %range))]
    async fn get_values(
        &self,
        store_id: &str,
        range: &WireRange,
    ) -> Result<TabularResult, StoreError> {
        let values = match range {
            WireRange::A1(a1) => {
                let request = self
                    .client
                    .get(self.values_url(store_id, a1))
                    .query(&[("majorDimension", "ROWS")]);
                let body: ValueRange = self.execute(request, "values.get").await?;
                body.values
            }
            WireRange::ById { region_id, cells } => {
                let url = format!("{}/values:batchGetByDataFilter", self.spreadsheet_url(store_id));
                let body = json!({
                    "dataFilters": [{ "gridRange": GridRange::new(*region_id, cells) }],
                    "majorDimension": "ROWS",
                });
                let response: BatchGetByFilterResponse = self
                    .execute(self.client.post(url).json(&body), "values.batchGetByDataFilter")
                    .await?;
                response
                    .value_ranges
                    .into_iter()
                    .next()
                    .map(|matched| matched.value_range.values)
                    .unwrap_or_default()
            }
        };

        debug!(rows = values.len(), "values fetched");
        Ok(into_table(values))
    }

    #[tracing::instrument(name = "sheets_update_values", skip(self, range, rows), fields(range = %range, rows = rows.len()))]
    async fn update_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        match range {
            WireRange::A1(a1) => {
                let request = self
                    .client
                    .put(self.values_url(store_id, a1))
                    .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
                    .json(&json!({
                        "range": a1,
                        "majorDimension": "ROWS",
                        "values": rows,
                    }));
                let response: UpdateResponse = self.execute(request, "values.update").await?;
                Ok(Ack {
                    updated_range: response.updated_range,
                    updated_rows: response.updated_rows,
                })
            }
            WireRange::ById { region_id, cells } => {
                let url = format!(
                    "{}/values:batchUpdateByDataFilter",
                    self.spreadsheet_url(store_id)
                );
                let body = json!({
                    "valueInputOption": VALUE_INPUT_OPTION,
                    "data": [{
                        "dataFilter": { "gridRange": GridRange::new(*region_id, cells) },
                        "majorDimension": "ROWS",
                        "values": rows,
                    }],
                });
                let response: BatchUpdateByFilterResponse = self
                    .execute(self.client.post(url).json(&body), "values.batchUpdateByDataFilter")
                    .await?;
                let updated_range = response
                    .responses
                    .into_iter()
                    .next()
                    .map(|r| r.updated_range)
                    .unwrap_or_else(|| range.to_string());
                Ok(Ack {
                    updated_range,
                    updated_rows: response.total_updated_rows,
                })
            }
        }
    }

    #[tracing::instrument(name = "sheets_append_values", skip(self, range, rows), fields(range = %range, rows = rows.len()))]
    async fn append_values(
        &self,
        store_id: &str,
        range: &WireRange,
        rows: &TabularResult,
    ) -> Result<Ack, StoreError> {
        let WireRange::A1(a1) = range else {
            return Err(StoreError::Unsupported("append requires an A1 range"));
        };

        let url = format!("{}:append", self.values_url(store_id, a1));
        let request = self
            .client
            .post(url)
            .query(&[
                ("valueInputOption", VALUE_INPUT_OPTION),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": rows }));
        let response: AppendResponse = self.execute(request, "values.append").await?;

        Ok(Ack {
            updated_range: response.updates.updated_range,
            updated_rows: response.updates.updated_rows,
        })
    }

    #[tracing::instrument(name = "sheets_region_metadata", skip(self))]
    async fn region_metadata(&self, store_id: &str) -> Result<Vec<RegionDescriptor>, StoreError> {
        let request = self
            .client
            .get(self.spreadsheet_url(store_id))
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let metadata: SpreadsheetMetadata = self.execute(request, "spreadsheets.get").await?;

        Ok(metadata
            .sheets
            .into_iter()
            .map(|sheet| RegionDescriptor {
                title: sheet.properties.title,
                stable_id: sheet.properties.sheet_id,
            })
            .collect())
    }

    #[tracing::instrument(name = "sheets_delete_rows", skip(self))]
    async fn delete_rows(
        &self,
        store_id: &str,
        stable_id: i64,
        start: u32,
        end: u32,
    ) -> Result<(), StoreError> {
        let url = format!("{}:batchUpdate", self.spreadsheet_url(store_id));
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": stable_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": end,
                    }
                }
            }]
        });
        let _: JsonValue = self
            .execute(self.client.post(url).json(&body), "spreadsheets.batchUpdate")
            .await?;
        Ok(())
    }
}
