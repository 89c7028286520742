//! Range addressing: turning a logical [`RangeSpec`] into wire ranges the store accepts.
//!
//! Reads try three strategies in a fixed order, cheapest first:
//!
//! 1. [`Strategy::Direct`]: `'Region Name'!A1:L200`, quoted only when needed.
//! 2. [`Strategy::UrlEncoded`]: quotes stripped, region percent-encoded.
//! 3. [`Strategy::MetadataResolved`]: region looked up in store metadata and
//!    addressed by its stable id.
//!
//! Escalation happens only on range-parse failures; any other error stops the fold.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use crate::store::{ReadError, StoreError};

/// A rectangular region inside the backing store, e.g. region `Indicators`, cells `A1:L200`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    region_name: String,
    cell_range: String,
}

impl RangeSpec {
    pub fn new(region_name: impl Into<String>, cell_range: impl Into<String>) -> Self {
        Self {
            region_name: region_name.into(),
            cell_range: cell_range.into(),
        }
    }

    /// Parse `Region!A1:L200` notation. Text without `!` names a whole region.
    ///
    /// Splits on the last `!`, since cell ranges never contain one but region names may.
    pub fn parse(notation: &str) -> Self {
        match notation.rsplit_once('!') {
            Some((region, cells)) => Self::new(region, cells),
            None => Self::new(notation, ""),
        }
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn cell_range(&self) -> &str {
        &self.cell_range
    }

    /// The same region restricted to other cells.
    pub fn with_cells(&self, cell_range: impl Into<String>) -> Self {
        Self::new(self.region_name.clone(), cell_range)
    }

    /// Wire range for the [`Strategy::Direct`] form, used by writes.
    pub fn direct_range(&self) -> WireRange {
        WireRange::a1(&quote_region(&self.region_name), &self.cell_range)
    }
}

impl std::fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cell_range.is_empty() {
            write!(f, "{}", self.region_name)
        } else {
            write!(f, "{}!{}", self.region_name, self.cell_range)
        }
    }
}

/// Region metadata entry: display title plus the id that survives renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub title: String,
    pub stable_id: i64,
}

/// A range as sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireRange {
    /// A1 notation, e.g. `'Indicators'!A1:L200`.
    A1(String),
    /// Region addressed by stable id.
    ById { region_id: i64, cells: CellRange },
}

impl WireRange {
    pub fn a1(region: &str, cells: &str) -> Self {
        if cells.is_empty() {
            WireRange::A1(region.to_string())
        } else {
            WireRange::A1(format!("{}!{}", region, cells))
        }
    }
}

impl std::fmt::Display for WireRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireRange::A1(range) => write!(f, "{}", range),
            WireRange::ById { region_id, cells } if *cells == CellRange::all() => {
                write!(f, "#{}", region_id)
            }
            WireRange::ById { region_id, cells } => write!(f, "#{}!{}", region_id, cells),
        }
    }
}

/// Range resolution strategies, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Direct,
    UrlEncoded,
    MetadataResolved,
}

impl Strategy {
    pub const ESCALATION: [Strategy; 3] = [
        Strategy::Direct,
        Strategy::UrlEncoded,
        Strategy::MetadataResolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::UrlEncoded => "url_encoded",
            Strategy::MetadataResolved => "metadata_resolved",
        }
    }
}

/// True when a region name must be quoted to appear in A1 notation.
pub fn needs_quoting(region: &str) -> bool {
    region
        .chars()
        .any(|c| c == ' ' || !(c.is_ascii_alphanumeric() || c == '_'))
}

fn is_quoted(region: &str) -> bool {
    region.len() >= 2
        && ((region.starts_with('\'') && region.ends_with('\''))
            || (region.starts_with('"') && region.ends_with('"')))
}

/// Wrap a region name in single quotes when needed. Already-quoted names are left alone.
pub fn quote_region(region: &str) -> String {
    if needs_quoting(region) && !is_quoted(region) {
        format!("'{}'", region)
    } else {
        region.to_string()
    }
}

/// Remove every quote character from a region name.
pub fn strip_quotes(region: &str) -> String {
    region.chars().filter(|c| *c != '\'' && *c != '"').collect()
}

/// Derive the wire range for the two strategies that need no store lookup.
///
/// Returns `None` for [`Strategy::MetadataResolved`].
pub fn wire_range(spec: &RangeSpec, strategy: Strategy) -> Option<WireRange> {
    match strategy {
        Strategy::Direct => Some(spec.direct_range()),
        Strategy::UrlEncoded => {
            let encoded = urlencoding::encode(&strip_quotes(spec.region_name())).into_owned();
            Some(WireRange::a1(&encoded, spec.cell_range()))
        }
        Strategy::MetadataResolved => None,
    }
}

/// Find the descriptor whose title matches `region` once quotes are stripped from both.
pub fn find_region<'a>(
    regions: &'a [RegionDescriptor],
    region: &str,
) -> Option<&'a RegionDescriptor> {
    let wanted = strip_quotes(region);
    regions.iter().find(|r| strip_quotes(&r.title) == wanted)
}

/// Source of region metadata, supplied by the store client.
#[async_trait::async_trait]
pub trait RegionMetadata: Send + Sync {
    async fn regions(&self) -> Result<Vec<RegionDescriptor>, StoreError>;
}

/// Escalating range resolver. Holds no cache of its own.
pub struct RangeNameResolver<'a> {
    metadata: &'a dyn RegionMetadata,
}

impl<'a> RangeNameResolver<'a> {
    pub fn new(metadata: &'a dyn RegionMetadata) -> Self {
        Self { metadata }
    }

    /// Look up a region's stable id by (quote-insensitive) title.
    pub async fn resolve_region_id(&self, region: &str) -> Result<i64, ReadError> {
        let regions = self.metadata.regions().await.map_err(ReadError::Store)?;
        find_region(&regions, region)
            .map(|r| r.stable_id)
            .ok_or_else(|| ReadError::RegionNotFound(region.to_string()))
    }

    /// Try each strategy in order, handing its wire range to `attempt`.
    ///
    /// Returns the first success with the strategy that produced it. Only
    /// [`StoreError::RangeParse`] moves on to the next strategy.
    pub async fn resolve<T, F, Fut>(
        &self,
        spec: &RangeSpec,
        mut attempt: F,
    ) -> Result<(Strategy, T), ReadError>
    where
        F: FnMut(Strategy, WireRange) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut last_error: Option<StoreError> = None;

        for strategy in Strategy::ESCALATION {
            let wire = match wire_range(spec, strategy) {
                Some(wire) => wire,
                None => match self.resolve_by_id(spec).await {
                    Ok(wire) => wire,
                    Err(ReadError::Store(e)) if e.is_range_parse() => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            debug!(
                strategy = strategy.as_str(),
                range = %wire,
                "attempting range"
            );

            match attempt(strategy, wire).await {
                Ok(value) => return Ok((strategy, value)),
                Err(e) if e.is_range_parse() => {
                    warn!(
                        strategy = strategy.as_str(),
                        region = spec.region_name(),
                        error = %e,
                        "range rejected, escalating"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(ReadError::Store(e)),
            }
        }

        Err(ReadError::RangeResolutionExhausted {
            region: spec.region_name().to_string(),
            last: last_error.unwrap_or_else(|| StoreError::RangeParse(spec.to_string())),
        })
    }

    async fn resolve_by_id(&self, spec: &RangeSpec) -> Result<WireRange, ReadError> {
        let cells = CellRange::parse(spec.cell_range())
            .map_err(|e| ReadError::Store(StoreError::RangeParse(e)))?;
        let region_id = self.resolve_region_id(spec.region_name()).await?;
        Ok(WireRange::ById { region_id, cells })
    }
}

/// A parsed A1 cell range with 0-based, end-exclusive bounds.
///
/// `None` bounds are open: `A:C` has no row bounds, `1:1` has no column bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellRange {
    pub start_row: Option<u32>,
    pub end_row: Option<u32>,
    pub start_col: Option<u32>,
    pub end_col: Option<u32>,
}

impl CellRange {
    /// The whole region.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse `A1:L200`, `A:C`, `1:1`, `A2:B`, `B2`, or an empty string (whole region).
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::all());
        }

        let (start, end) = match text.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (text, None),
        };

        let (start_col, start_row) = parse_cell(start)
            .ok_or_else(|| format!("invalid cell reference '{}' in '{}'", start, text))?;
        let (end_col, end_row) = match end {
            Some(end) => parse_cell(end)
                .ok_or_else(|| format!("invalid cell reference '{}' in '{}'", end, text))?,
            // Single cell: the end is the start.
            None => (start_col, start_row),
        };

        let range = Self {
            start_row,
            end_row: end_row.map(|r| r + 1),
            start_col,
            end_col: end_col.map(|c| c + 1),
        };

        if let (Some(s), Some(e)) = (range.start_row, range.end_row) {
            if s >= e {
                return Err(format!("row bounds out of order in '{}'", text));
            }
        }
        if let (Some(s), Some(e)) = (range.start_col, range.end_col) {
            if s >= e {
                return Err(format!("column bounds out of order in '{}'", text));
            }
        }
        Ok(range)
    }

    /// A single full row, 1-based, as `{row}:{row}`.
    pub fn row(row_1_based: u32) -> Self {
        Self {
            start_row: Some(row_1_based.saturating_sub(1)),
            end_row: Some(row_1_based),
            start_col: None,
            end_col: None,
        }
    }
}

impl std::fmt::Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::all() {
            return Ok(());
        }
        let start_col = self.start_col.map(column_letters).unwrap_or_default();
        let start_row = self
            .start_row
            .map(|r| (r + 1).to_string())
            .unwrap_or_default();
        let end_col = self
            .end_col
            .map(|c| column_letters(c - 1))
            .unwrap_or_default();
        let end_row = self.end_row.map(|r| r.to_string()).unwrap_or_default();
        write!(f, "{}{}:{}{}", start_col, start_row, end_col, end_row)
    }
}

/// Split a cell reference into 0-based (column, row). Either half may be absent, not both.
fn parse_cell(cell: &str) -> Option<(Option<u32>, Option<u32>)> {
    let cell = cell.trim();
    let split = cell
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);

    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(row - 1)
    };

    if col.is_none() && row.is_none() {
        return None;
    }
    Some((col, row))
}

/// Column letters to 0-based index: `A` → 0, `Z` → 25, `AA` → 26.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut index: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
    }
    Some(index - 1)
}

/// 0-based column index to letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letters(index: u32) -> String {
    let mut n = index as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedRegions(Result<Vec<RegionDescriptor>, StoreError>);

    #[async_trait::async_trait]
    impl RegionMetadata for FixedRegions {
        async fn regions(&self) -> Result<Vec<RegionDescriptor>, StoreError> {
            self.0.clone()
        }
    }

    fn regions() -> FixedRegions {
        FixedRegions(Ok(vec![
            RegionDescriptor {
                title: "committees".to_string(),
                stable_id: 0,
            },
            RegionDescriptor {
                title: "Monitoring Results".to_string(),
                stable_id: 812,
            },
        ]))
    }

    #[test]
    fn test_needs_quoting() {
        assert!(!needs_quoting("committees"));
        assert!(!needs_quoting("Sheet_1"));
        assert!(needs_quoting("Monitoring Results"));
        assert!(needs_quoting("지표_목록"));
        assert!(needs_quoting("a-b"));
    }

    #[test]
    fn test_direct_quotes_only_when_needed() {
        let plain = RangeSpec::new("committees", "A:C");
        assert_eq!(
            wire_range(&plain, Strategy::Direct),
            Some(WireRange::A1("committees!A:C".to_string()))
        );

        let spaced = RangeSpec::new("Monitoring Results", "A1:L200");
        assert_eq!(
            wire_range(&spaced, Strategy::Direct),
            Some(WireRange::A1("'Monitoring Results'!A1:L200".to_string()))
        );

        let quoted = RangeSpec::new("'Monitoring Results'", "A1:L200");
        assert_eq!(
            wire_range(&quoted, Strategy::Direct),
            Some(WireRange::A1("'Monitoring Results'!A1:L200".to_string()))
        );
    }

    #[test]
    fn test_url_encoded_strips_quotes() {
        let spec = RangeSpec::new("'Monitoring Results'", "A1:B2");
        assert_eq!(
            wire_range(&spec, Strategy::UrlEncoded),
            Some(WireRange::A1("Monitoring%20Results!A1:B2".to_string()))
        );
        assert_eq!(wire_range(&spec, Strategy::MetadataResolved), None);
    }

    #[test]
    fn test_range_spec_parse() {
        let spec = RangeSpec::parse("committees!A:C");
        assert_eq!(spec.region_name(), "committees");
        assert_eq!(spec.cell_range(), "A:C");

        let whole = RangeSpec::parse("committees");
        assert_eq!(whole.cell_range(), "");
        assert_eq!(whole.to_string(), "committees");

        let bang = RangeSpec::parse("Wow!Sheet!A1");
        assert_eq!(bang.region_name(), "Wow!Sheet");
        assert_eq!(bang.cell_range(), "A1");
    }

    #[test]
    fn test_find_region_ignores_quotes() {
        let descriptors = vec![RegionDescriptor {
            title: "Bob's Sheet".to_string(),
            stable_id: 7,
        }];
        assert_eq!(find_region(&descriptors, "'Bob's Sheet'").map(|r| r.stable_id), Some(7));
        assert!(find_region(&descriptors, "Alice").is_none());
    }

    #[test]
    fn test_column_letters_roundtrip_edges() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("aa"), Some(26));
        assert_eq!(column_index("ZZ"), Some(701));
        assert_eq!(column_index(""), None);
    }

    #[test]
    fn test_cell_range_parse_forms() {
        let full = CellRange::parse("A1:L200").unwrap();
        assert_eq!(full.start_row, Some(0));
        assert_eq!(full.end_row, Some(200));
        assert_eq!(full.start_col, Some(0));
        assert_eq!(full.end_col, Some(12));

        let cols = CellRange::parse("A:C").unwrap();
        assert_eq!((cols.start_row, cols.end_row), (None, None));
        assert_eq!((cols.start_col, cols.end_col), (Some(0), Some(3)));

        let row = CellRange::parse("1:1").unwrap();
        assert_eq!(row, CellRange::row(1));
        assert_eq!((row.start_col, row.end_col), (None, None));

        let open_end = CellRange::parse("A2:B").unwrap();
        assert_eq!((open_end.start_row, open_end.end_row), (Some(1), None));

        let single = CellRange::parse("B2").unwrap();
        assert_eq!(single.to_string(), "B2:B2");

        assert_eq!(CellRange::parse("").unwrap(), CellRange::all());
    }

    #[test]
    fn test_cell_range_parse_rejects_garbage() {
        assert!(CellRange::parse("A0:B2").is_err());
        assert!(CellRange::parse("!!").is_err());
        assert!(CellRange::parse("C1:A1").is_err());
        assert!(CellRange::parse("A1:").is_err());
    }

    #[test]
    fn test_cell_range_display() {
        assert_eq!(CellRange::parse("A1:L200").unwrap().to_string(), "A1:L200");
        assert_eq!(CellRange::parse("A:C").unwrap().to_string(), "A:C");
        assert_eq!(CellRange::row(3).to_string(), "3:3");
        assert_eq!(CellRange::all().to_string(), "");
    }

    #[tokio::test]
    async fn test_escalation_order_is_direct_encoded_metadata() {
        let metadata = regions();
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("Monitoring Results", "A1:B2");
        let seen = Mutex::new(Vec::new());

        let (strategy, value) = resolver
            .resolve(&spec, |strategy, wire| {
                seen.lock().unwrap().push((strategy, wire.clone()));
                async move {
                    match strategy {
                        Strategy::MetadataResolved => Ok("rows"),
                        _ => Err(StoreError::RangeParse(wire.to_string())),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(strategy, Strategy::MetadataResolved);
        assert_eq!(value, "rows");

        let seen = seen.into_inner().unwrap();
        let order: Vec<Strategy> = seen.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, Strategy::ESCALATION.to_vec());
        assert_eq!(
            seen[2].1,
            WireRange::ById {
                region_id: 812,
                cells: CellRange::parse("A1:B2").unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_direct_success_short_circuits() {
        let metadata = FixedRegions(Err(StoreError::Auth("metadata must not be called".into())));
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("committees", "A:C");
        let calls = Mutex::new(0);

        let (strategy, _) = resolver
            .resolve(&spec, |_, _| {
                *calls.lock().unwrap() += 1;
                async { Ok::<_, StoreError>(()) }
            })
            .await
            .unwrap();

        assert_eq!(strategy, Strategy::Direct);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_parse_error_does_not_escalate() {
        let metadata = regions();
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("Monitoring Results", "A1:B2");
        let calls = Mutex::new(Vec::new());

        let result: Result<(Strategy, ()), ReadError> = resolver
            .resolve(&spec, |strategy, _| {
                calls.lock().unwrap().push(strategy);
                async { Err(StoreError::Quota("rate limited".into())) }
            })
            .await;

        assert!(matches!(result, Err(ReadError::Store(StoreError::Quota(_)))));
        assert_eq!(*calls.lock().unwrap(), vec![Strategy::Direct]);
    }

    #[tokio::test]
    async fn test_region_not_found_after_two_parse_failures() {
        let metadata = regions();
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("Missing Tab", "A1:B2");

        let result: Result<(Strategy, ()), ReadError> = resolver
            .resolve(&spec, |_, wire| async move {
                Err(StoreError::RangeParse(wire.to_string()))
            })
            .await;

        assert!(matches!(result, Err(ReadError::RegionNotFound(name)) if name == "Missing Tab"));
    }

    #[tokio::test]
    async fn test_exhausted_when_all_strategies_fail() {
        let metadata = regions();
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("Monitoring Results", "A1:B2");

        let result: Result<(Strategy, ()), ReadError> = resolver
            .resolve(&spec, |_, wire| async move {
                Err(StoreError::RangeParse(wire.to_string()))
            })
            .await;

        match result {
            Err(ReadError::RangeResolutionExhausted { region, last }) => {
                assert_eq!(region, "Monitoring Results");
                assert!(last.is_range_parse());
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unparseable_cells_exhaust_without_metadata_attempt() {
        let metadata = regions();
        let resolver = RangeNameResolver::new(&metadata);
        let spec = RangeSpec::new("Monitoring Results", "nonsense!!");
        let calls = Mutex::new(0);

        let result: Result<(Strategy, ()), ReadError> = resolver
            .resolve(&spec, |_, wire| {
                *calls.lock().unwrap() += 1;
                async move { Err(StoreError::RangeParse(wire.to_string())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(ReadError::RangeResolutionExhausted { .. })
        ));
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
