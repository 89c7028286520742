use std::time::Duration;

/// Errors reported by a backing store, classified by cause.
///
/// Only [`StoreError::RangeParse`] triggers range escalation; everything else
/// is a real failure and surfaces as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not parse the wire range.
    RangeParse(String),
    Auth(String),
    Network(String),
    Quota(String),
    Timeout,
    /// No store identifier is configured.
    NotConfigured,
    /// The store does not support this operation for the given range form.
    Unsupported(&'static str),
    Api { status: u16, message: String },
    Decode(String),
}

impl StoreError {
    pub fn is_range_parse(&self) -> bool {
        matches!(self, StoreError::RangeParse(_))
    }

    /// Classify an HTTP error status plus the store's error message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 if message.contains("Unable to parse range") => StoreError::RangeParse(message),
            401 | 403 => StoreError::Auth(message),
            429 => StoreError::Quota(message),
            500..=599 => StoreError::Network(format!("HTTP {}: {}", status, message)),
            _ => StoreError::Api { status, message },
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RangeParse(msg) => write!(f, "range parse error: {}", msg),
            StoreError::Auth(msg) => write!(f, "authentication error: {}", msg),
            StoreError::Network(msg) => write!(f, "network error: {}", msg),
            StoreError::Quota(msg) => write!(f, "quota exceeded: {}", msg),
            StoreError::Timeout => write!(f, "request timed out"),
            StoreError::NotConfigured => write!(f, "no store identifier configured"),
            StoreError::Unsupported(what) => write!(f, "unsupported operation: {}", what),
            StoreError::Api { status, message } => write!(f, "HTTP {}: {}", status, message),
            StoreError::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from reading a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Metadata lookup found no region with this title.
    RegionNotFound(String),
    /// Every range strategy was rejected as unparseable.
    RangeResolutionExhausted { region: String, last: StoreError },
    Store(StoreError),
    /// The live fetch did not finish within the deadline.
    Timeout(Duration),
    /// The task running the live fetch panicked or was cancelled.
    Aborted(String),
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::RegionNotFound(region) => write!(f, "region '{}' not found", region),
            ReadError::RangeResolutionExhausted { region, last } => write!(
                f,
                "could not resolve a range for region '{}': {}",
                region, last
            ),
            ReadError::Store(e) => write!(f, "{}", e),
            ReadError::Timeout(after) => {
                write!(f, "live fetch timed out after {}ms", after.as_millis())
            }
            ReadError::Aborted(msg) => write!(f, "live fetch aborted: {}", msg),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::RangeResolutionExhausted { last, .. } => Some(last),
            ReadError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ReadError {
    fn from(e: StoreError) -> Self {
        ReadError::Store(e)
    }
}

/// A write the store did not persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWriteError {
    pub range: String,
    pub source: StoreError,
}

impl std::fmt::Display for StoreWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "write to {} failed: {}", self.range, self.source)
    }
}

impl std::error::Error for StoreWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Why the blank-overwrite strategy of a row delete failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlankError {
    HeaderRead(ReadError),
    /// Row 1 is empty, so there is no column count to blank.
    EmptyHeader,
    Write(StoreWriteError),
}

impl std::fmt::Display for BlankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlankError::HeaderRead(e) => write!(f, "header read failed: {}", e),
            BlankError::EmptyHeader => write!(f, "header row is empty"),
            BlankError::Write(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BlankError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlankError::HeaderRead(e) => Some(e),
            BlankError::Write(e) => Some(e),
            BlankError::EmptyHeader => None,
        }
    }
}

/// A row delete where neither strategy succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDeleteError {
    /// Rows are 1-based; row 0 does not exist.
    InvalidRow { region: String, row: u32 },
    Failed {
        region: String,
        row: u32,
        structural: ReadError,
        blank: BlankError,
    },
}

impl std::fmt::Display for StoreDeleteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreDeleteError::InvalidRow { region, row } => {
                write!(f, "invalid row {} in region '{}' (rows start at 1)", row, region)
            }
            StoreDeleteError::Failed {
                region,
                row,
                structural,
                blank,
            } => write!(
                f,
                "delete of row {} in region '{}' failed: structural delete: {}; blank overwrite: {}",
                row, region, structural, blank
            ),
        }
    }
}

impl std::error::Error for StoreDeleteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreDeleteError::Failed { blank, .. } => Some(blank),
            StoreDeleteError::InvalidRow { .. } => None,
        }
    }
}
