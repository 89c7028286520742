use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::range::RangeSpec;
use crate::store::http::DEFAULT_API_BASE;
use crate::TabularResult;

pub const CONFIG_FILENAME: &str = ".sheetcache.toml";

pub const ENV_SPREADSHEET_ID: &str = "SPREADSHEET_ID";
pub const ENV_ACCESS_TOKEN: &str = "SHEETS_ACCESS_TOKEN";
pub const ENV_API_BASE: &str = "SHEETS_API_BASE";

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

/// A named dataset: where it lives, how long to cache it, and what to serve
/// when the store cannot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// `Region!A1:L200` notation.
    pub range: String,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default)]
    pub defaults: Vec<Vec<String>>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            api_base: default_api_base(),
            access_token: None,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            datasets: BTreeMap::new(),
        }
    }
}

impl DatasetConfig {
    pub fn spec(&self) -> RangeSpec {
        RangeSpec::parse(&self.range)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn default_rows(&self) -> TabularResult {
        TabularResult::new(self.defaults.clone())
    }
}

impl Config {
    /// Load from `./.sheetcache.toml`, else the user config file, else defaults,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => load_config_from_path(&path)?,
            None => Config::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Overlay values from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(id) = lookup(ENV_SPREADSHEET_ID) {
            self.spreadsheet_id = Some(id);
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(base) = lookup(ENV_API_BASE) {
            self.api_base = base;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_ms == 0 {
            anyhow::bail!("fetch_timeout_ms must be greater than zero");
        }
        for (name, dataset) in &self.datasets {
            if dataset.range.trim().is_empty() {
                anyhow::bail!("Dataset '{}' has an empty range", name);
            }
            if dataset.ttl_ms == 0 {
                anyhow::bail!("Dataset '{}' has ttl_ms = 0; use a positive TTL", name);
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.get(name)
    }
}

/// User-level config location, e.g. `~/.config/sheetcache/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sheetcache").join("config.toml"))
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.is_file() {
        return Some(local);
    }
    user_config_path().filter(|path| path.is_file())
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}
