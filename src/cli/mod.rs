pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ENV_ACCESS_TOKEN, ENV_API_BASE, ENV_SPREADSHEET_ID};
use crate::logging::LogFormat;

#[derive(Parser)]
#[command(name = "sheetcache")]
#[command(about = "Read and edit spreadsheet-backed datasets through a fallback-aware cache")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args)]
pub struct GlobalArgs {
    /// Path to config file (default: ./.sheetcache.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Spreadsheet to read from and write to
    #[arg(long, global = true, env = ENV_SPREADSHEET_ID)]
    pub spreadsheet_id: Option<String>,

    /// OAuth bearer token for the Sheets API
    #[arg(long, global = true, env = ENV_ACCESS_TOKEN, hide_env_values = true)]
    pub token: Option<String>,

    /// Sheets API base URL
    #[arg(long, global = true, env = ENV_API_BASE)]
    pub api_base: Option<String>,

    /// Serve from an in-memory spreadsheet loaded from a JSON file instead of the API
    ///
    /// The file maps region titles to rows: {"Committees": [["id", "name"], ["C1", "Finance"]]}
    #[arg(long, global = true, value_name = "FILE")]
    pub offline: Option<PathBuf>,

    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a dataset through the cache, with static fallback
    Get(GetArgs),
    /// List regions (sheet tabs) in the spreadsheet
    Regions,
    /// Overwrite a range with rows
    Write(WriteArgs),
    /// Append rows after the last data row of a range
    Append(WriteArgs),
    /// Delete a row, blanking it if structural delete is not possible
    DeleteRow(DeleteRowArgs),
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Dataset name from the config catalogue
    #[arg(required_unless_present = "range", conflicts_with = "range")]
    pub dataset: Option<String>,

    /// Read an ad-hoc range instead, e.g. 'Monitoring Results!A1:L200'
    #[arg(long)]
    pub range: Option<String>,

    /// Cache TTL for ad-hoc ranges, in milliseconds
    #[arg(long, default_value = "300000")]
    pub ttl_ms: u64,

    /// Print rows as header-keyed records
    #[arg(long)]
    pub records: bool,
}

#[derive(clap::Args)]
pub struct WriteArgs {
    /// Target range, e.g. 'Schedules!A2:C2'
    #[arg(long)]
    pub range: String,

    /// Rows as a JSON array of arrays, e.g. '[["2024-03-01","Finance","A"]]'
    #[arg(long)]
    pub rows: String,
}

#[derive(clap::Args)]
pub struct DeleteRowArgs {
    /// Region (sheet tab) title
    pub region: String,

    /// 1-based row number
    pub row: u32,
}
