use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of cell values. Rows may be ragged.
pub type Row = Vec<String>;

/// Rows read from or written to a region, in store order.
///
/// The first row is conventionally a header, but nothing here depends on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabularResult(Vec<Row>);

impl TabularResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self(rows)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn rows(&self) -> &[Row] {
        &self.0
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn header(&self) -> Option<&Row> {
        self.0.first()
    }

    /// Project rows after the header into field maps keyed by header cell.
    ///
    /// Cells missing from a short row become empty strings; cells beyond the
    /// header width are dropped.
    pub fn to_records(&self) -> Vec<BTreeMap<String, String>> {
        let Some((header, body)) = self.0.split_first() else {
            return Vec::new();
        };

        body.iter()
            .map(|row| {
                header
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| (name.clone(), row.get(idx).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }
}

impl From<Vec<Row>> for TabularResult {
    fn from(rows: Vec<Row>) -> Self {
        Self(rows)
    }
}

impl From<&[&[&str]]> for TabularResult {
    fn from(rows: &[&[&str]]) -> Self {
        Self(
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        )
    }
}
