//! Cached, fallback-aware access to spreadsheet-backed tabular data.
//!
//! Reads pass through an in-process TTL cache, then the live store, then a
//! static default, and report which of the three answered. Writes and row
//! deletes go straight to the store.

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod fallback;
pub mod logging;
pub mod range;
pub mod service;
pub mod store;
mod table;

pub use cache::{InvalidTtl, TtlCache};
pub use client::{Deleted, TabularStoreClient};
pub use config::Config;
pub use fallback::{FallbackOutcome, FallbackResolver, Source};
pub use range::{RangeNameResolver, RangeSpec, Strategy, WireRange};
pub use service::{RecordService, UnknownDataset};
pub use store::{
    Ack, BackingStore, MemoryStore, ReadError, SheetsHttpStore, StoreDeleteError, StoreError,
    StoreWriteError,
};
pub use table::{Row, TabularResult};

// Re-export tracing for use in other modules
pub use tracing;
