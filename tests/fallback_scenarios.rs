//! Cache, live, and fallback provenance through RecordService over a mock Sheets API.

mod helpers;

use helpers::{can_bind_loopback, spawn_mock_sheets, table, STORE_ID};
use sheetcache::{
    Config, MemoryStore, RangeSpec, RecordService, SheetsHttpStore, Source, TabularResult, TtlCache,
};
use std::sync::Arc;
use std::time::Duration;

fn committees() -> TabularResult {
    table(&[
        &["id", "name", "chair"],
        &["C1", "Finance", "Ada"],
        &["C2", "Health", "Grace"],
    ])
}

fn config(api_base: &str) -> Config {
    let mut config: Config = toml::from_str(
        r#"
[datasets.committees]
range = "Committees!A1:C100"
ttl_ms = 60000
defaults = [["id", "name", "chair"], ["C0", "Unavailable", ""]]
"#,
    )
    .unwrap();
    config.spreadsheet_id = Some(STORE_ID.to_string());
    config.api_base = api_base.to_string();
    config.fetch_timeout_ms = 2000;
    config
}

fn service(config: &Config) -> RecordService<SheetsHttpStore> {
    let store = SheetsHttpStore::new(config.api_base.clone(), None).unwrap();
    RecordService::from_config(store, Arc::new(TtlCache::new()), config)
}

#[tokio::test]
async fn test_warm_cache_then_outage() {
    if !can_bind_loopback().await {
        eprintln!("skipping fallback scenario: cannot bind to loopback in this environment");
        return;
    }

    let (mock, api_base) =
        spawn_mock_sheets(MemoryStore::new(STORE_ID).with_region("Committees", 1, committees()))
            .await;
    let service = service(&config(&api_base));

    let live = service.get_dataset("committees").await.unwrap();
    assert_eq!(live.source, Source::Live);
    assert_eq!(live.data, committees());

    mock.fail_with(503, "The service is currently unavailable.").await;
    mock.clear_requests().await;

    let cached = service.get_dataset("committees").await.unwrap();
    assert_eq!(cached.source, Source::Cache);
    assert_eq!(cached.data, committees());
    assert!(cached.cached_at.is_some());
    assert!(mock.requests().await.is_empty());

    mock.stop().await;
}

#[tokio::test]
async fn test_cold_outage_then_recovery() {
    if !can_bind_loopback().await {
        eprintln!("skipping fallback scenario: cannot bind to loopback in this environment");
        return;
    }

    let (mock, api_base) =
        spawn_mock_sheets(MemoryStore::new(STORE_ID).with_region("Committees", 1, committees()))
            .await;
    let service = service(&config(&api_base));

    mock.fail_with(503, "The service is currently unavailable.").await;
    let fallback = service.get_dataset("committees").await.unwrap();
    assert_eq!(fallback.source, Source::StaticFallback);
    assert_eq!(fallback.data.rows()[1], vec!["C0", "Unavailable", ""]);
    assert!(fallback.is_fallback());

    // The fallback was not cached, so the next call goes live.
    mock.recover().await;
    let live = service.get_dataset("committees").await.unwrap();
    assert_eq!(live.source, Source::Live);
    assert_eq!(live.data, committees());

    mock.stop().await;
}

#[tokio::test]
async fn test_escalated_read_is_cached() {
    if !can_bind_loopback().await {
        eprintln!("skipping fallback scenario: cannot bind to loopback in this environment");
        return;
    }

    let (mock, api_base) = spawn_mock_sheets(
        MemoryStore::new(STORE_ID).with_region("Bob's Sheet", 9, committees()),
    )
    .await;
    let service = service(&config(&api_base));
    let spec = RangeSpec::new("Bob's Sheet", "A1:C10");
    let ttl = Duration::from_secs(30);

    let live = service
        .get_records("bobs", &spec, TabularResult::empty(), ttl)
        .await;
    assert_eq!(live.source, Source::Live);
    assert_eq!(mock.requests().await.len(), 4);

    let cached = service
        .get_records("bobs", &spec, TabularResult::empty(), ttl)
        .await;
    assert_eq!(cached.source, Source::Cache);
    assert_eq!(mock.requests().await.len(), 4);

    mock.stop().await;
}

#[tokio::test]
async fn test_missing_spreadsheet_id_serves_defaults() {
    let mut config = config("http://127.0.0.1:9/v4");
    config.spreadsheet_id = None;
    let service = service(&config);

    let outcome = service.get_dataset("committees").await.unwrap();
    assert_eq!(outcome.source, Source::StaticFallback);
    assert_eq!(outcome.count(), 2);

    let err = service
        .write_records(&RangeSpec::new("Committees", "A2:C2"), &committees())
        .await
        .unwrap_err();
    assert_eq!(err.source, sheetcache::StoreError::NotConfigured);
}
