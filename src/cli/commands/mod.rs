mod edit;
mod read;

pub use edit::{execute_append, execute_delete_row, execute_write};
pub use read::{execute_get, execute_regions};

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cache::TtlCache;
use crate::cli::{Cli, Commands, GlobalArgs};
use crate::config::{load_config_from_path, Config};
use crate::service::RecordService;
use crate::store::{BackingStore, MemoryStore, SheetsHttpStore};
use crate::TabularResult;

const OFFLINE_STORE_ID: &str = "offline";

pub async fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.global)?;
    let store = build_store(&cli.global, &mut config)?;
    let service = RecordService::from_config(store, Arc::new(TtlCache::new()), &config);

    match cli.command {
        Commands::Get(args) => execute_get(&service, args).await,
        Commands::Regions => execute_regions(&service).await,
        Commands::Write(args) => execute_write(&service, args).await,
        Commands::Append(args) => execute_append(&service, args).await,
        Commands::DeleteRow(args) => execute_delete_row(&service, args).await,
    }
}

/// Config file, then environment, then command-line flags.
fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            config.apply_overrides(|name| std::env::var(name).ok());
            config
        }
        None => Config::load()?,
    };

    if let Some(id) = &global.spreadsheet_id {
        config.spreadsheet_id = Some(id.clone());
    }
    if let Some(token) = &global.token {
        config.access_token = Some(token.clone());
    }
    if let Some(base) = &global.api_base {
        config.api_base = base.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_store(global: &GlobalArgs, config: &mut Config) -> Result<Arc<dyn BackingStore>> {
    match &global.offline {
        Some(path) => {
            let store_id = config
                .spreadsheet_id
                .get_or_insert_with(|| OFFLINE_STORE_ID.to_string())
                .clone();
            let store = load_offline_store(path, &store_id)?;
            Ok(Arc::new(store))
        }
        None => {
            let store = SheetsHttpStore::new(config.api_base.clone(), config.access_token.clone())
                .context("Failed to create Sheets API client")?;
            Ok(Arc::new(store))
        }
    }
}

/// Build a [`MemoryStore`] from `{"Region": [[cells...], ...], ...}`.
///
/// Stable ids follow sorted title order, starting at 0.
pub fn load_offline_store(path: impl AsRef<Path>, store_id: &str) -> Result<MemoryStore> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let regions: BTreeMap<String, Vec<Vec<String>>> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;

    let store = MemoryStore::new(store_id);
    for (stable_id, (title, rows)) in regions.into_iter().enumerate() {
        store.add_region(&title, stable_id as i64, TabularResult::new(rows));
    }
    info!(path = %path.as_ref().display(), "serving from offline spreadsheet");
    Ok(store)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_rows(json: &str) -> Result<TabularResult> {
    let rows: Vec<Vec<String>> = serde_json::from_str(json)
        .context("--rows must be a JSON array of arrays of strings")?;
    Ok(TabularResult::new(rows))
}
