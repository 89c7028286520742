#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use sheetcache::range::{CellRange, WireRange};
use sheetcache::{BackingStore, MemoryStore, StoreError, TabularResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

pub const STORE_ID: &str = "sheet-1";

/// One HTTP request received by the mock, with its path percent-decoded once.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: Value,
}

#[derive(Clone)]
struct SheetsState {
    store: Arc<MemoryStore>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    forced: Arc<Mutex<Option<(u16, String)>>>,
}

/// Mock Google Sheets v4 API serving the contents of a [`MemoryStore`].
pub struct MockSheets {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    state: SheetsState,
}

impl MockSheets {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.state.store
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub async fn clear_requests(&self) {
        self.state.requests.lock().await.clear();
    }

    /// Answer every following request with this error status and message.
    pub async fn fail_with(&self, status: u16, message: &str) {
        *self.state.forced.lock().await = Some((status, message.to_string()));
    }

    pub async fn recover(&self) {
        *self.state.forced.lock().await = None;
    }
}

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Spawn the mock Sheets API, return (server handle, API base URL ending in `/v4`)
pub async fn spawn_mock_sheets(store: MemoryStore) -> (MockSheets, String) {
    let state = SheetsState {
        store: Arc::new(store),
        requests: Arc::new(Mutex::new(Vec::new())),
        forced: Arc::new(Mutex::new(None)),
    };

    let app = Router::new().fallback(dispatch).with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("failed to bind mock sheets listener");
    let port = listener.local_addr().unwrap().port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock sheets server error: {}", err);
        }
    });

    (
        MockSheets {
            shutdown_tx,
            handle,
            state,
        },
        format!("http://127.0.0.1:{}/v4", port),
    )
}

pub fn table(cells: &[&[&str]]) -> TabularResult {
    TabularResult::from(cells)
}

fn error_response(status: u16, message: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
    )
        .into_response()
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::RangeParse(message) => error_response(400, &message),
        StoreError::Auth(message) => error_response(403, &message),
        StoreError::Quota(message) => error_response(429, &message),
        StoreError::Network(message) => error_response(503, &message),
        StoreError::Api { status, message } => error_response(status, &message),
        other => error_response(500, &other.to_string()),
    }
}

async fn dispatch(
    State(state): State<SheetsState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let raw_path = uri.path().to_string();
    let path = urlencoding::decode(&raw_path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw_path.clone());

    state.requests.lock().await.push(RecordedRequest {
        method: method.to_string(),
        path,
        query: uri.query().unwrap_or_default().to_string(),
        body: body.clone(),
    });

    if let Some((status, message)) = state.forced.lock().await.clone() {
        return error_response(status, &message);
    }

    let Some(rest) = raw_path.strip_prefix("/v4/spreadsheets/") else {
        return error_response(404, "Not Found");
    };

    match route(&state.store, &method, rest, &body).await {
        Ok(value) => Json(value).into_response(),
        Err(err) => store_error_response(err),
    }
}

async fn route(
    store: &MemoryStore,
    method: &Method,
    rest: &str,
    body: &Value,
) -> Result<Value, StoreError> {
    let (id_part, tail) = match rest.split_once('/') {
        Some((id, tail)) => (id, Some(tail)),
        None => (rest, None),
    };

    match (method, tail) {
        (&Method::GET, None) => {
            let regions = store.region_metadata(id_part).await?;
            let sheets: Vec<Value> = regions
                .into_iter()
                .map(|r| json!({ "properties": { "sheetId": r.stable_id, "title": r.title } }))
                .collect();
            Ok(json!({ "sheets": sheets }))
        }
        (&Method::POST, None) => {
            let id = id_part.strip_suffix(":batchUpdate").ok_or_else(not_found)?;
            let range = &body["requests"][0]["deleteDimension"]["range"];
            store
                .delete_rows(
                    id,
                    range["sheetId"].as_i64().unwrap_or_default(),
                    range["startIndex"].as_u64().unwrap_or_default() as u32,
                    range["endIndex"].as_u64().unwrap_or_default() as u32,
                )
                .await?;
            Ok(json!({ "spreadsheetId": id, "replies": [{}] }))
        }
        (&Method::POST, Some("values:batchGetByDataFilter")) => {
            let range = grid_range(&body["dataFilters"][0]["gridRange"]);
            let rows = store.get_values(id_part, &range).await?;
            Ok(json!({ "valueRanges": [{ "valueRange": values_body(&range, &rows) }] }))
        }
        (&Method::POST, Some("values:batchUpdateByDataFilter")) => {
            let data = &body["data"][0];
            let range = grid_range(&data["dataFilter"]["gridRange"]);
            let rows = rows_from(&data["values"]);
            let ack = store.update_values(id_part, &range, &rows).await?;
            Ok(json!({
                "totalUpdatedRows": ack.updated_rows,
                "responses": [{ "updatedRange": ack.updated_range, "updatedRows": ack.updated_rows }],
            }))
        }
        (_, Some(tail)) => {
            let encoded = tail.strip_prefix("values/").ok_or_else(not_found)?;
            let (encoded, append) = match encoded.strip_suffix(":append") {
                Some(encoded) => (encoded, true),
                None => (encoded, false),
            };
            let a1 = urlencoding::decode(encoded)
                .map_err(|e| StoreError::RangeParse(format!("Unable to parse range: {}", e)))?
                .into_owned();
            let range = WireRange::A1(a1);

            match (method, append) {
                (&Method::GET, false) => {
                    let rows = store.get_values(id_part, &range).await?;
                    Ok(values_body(&range, &rows))
                }
                (&Method::PUT, false) => {
                    let ack = store
                        .update_values(id_part, &range, &rows_from(&body["values"]))
                        .await?;
                    Ok(json!({ "updatedRange": ack.updated_range, "updatedRows": ack.updated_rows }))
                }
                (&Method::POST, true) => {
                    let ack = store
                        .append_values(id_part, &range, &rows_from(&body["values"]))
                        .await?;
                    Ok(json!({
                        "updates": { "updatedRange": ack.updated_range, "updatedRows": ack.updated_rows }
                    }))
                }
                _ => Err(not_found()),
            }
        }
        _ => Err(not_found()),
    }
}

fn not_found() -> StoreError {
    StoreError::Api {
        status: 404,
        message: "Not Found".to_string(),
    }
}

/// Sheets omits `values` entirely for an empty range.
fn values_body(range: &WireRange, rows: &TabularResult) -> Value {
    if rows.is_empty() {
        json!({ "range": range.to_string(), "majorDimension": "ROWS" })
    } else {
        json!({ "range": range.to_string(), "majorDimension": "ROWS", "values": rows })
    }
}

fn rows_from(values: &Value) -> TabularResult {
    TabularResult::new(serde_json::from_value(values.clone()).unwrap_or_default())
}

fn grid_range(value: &Value) -> WireRange {
    let bound = |name: &str| value[name].as_u64().map(|v| v as u32);
    WireRange::ById {
        region_id: value["sheetId"].as_i64().unwrap_or_default(),
        cells: CellRange {
            start_row: bound("startRowIndex"),
            end_row: bound("endRowIndex"),
            start_col: bound("startColumnIndex"),
            end_col: bound("endColumnIndex"),
        },
    }
}
