//! Tabular-store boundary: named collections of rows addressed by 1-based
//! row and column positions.

pub mod file;
pub mod memory;
pub mod retry;
pub mod sheets;

use crate::engine::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Formatted cell text, row-major. Trailing empty cells and rows may be
/// omitted by a backend, so readers must treat a short row as blank-padded.
pub type Grid = Vec<Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub id: i64,
    pub name: String,
    pub row_count: u32,
    pub column_count: u32,
}

/// Rectangular read/write target. All bounds are 1-based and inclusive;
/// `end_row = None` reads through the last row holding data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRange {
    pub collection: String,
    pub start_row: u32,
    pub end_row: Option<u32>,
    pub start_col: u32,
    pub end_col: u32,
}

impl CellRange {
    pub fn rows(collection: &str, start_row: u32, end_col: u32) -> Self {
        Self {
            collection: collection.to_string(),
            start_row,
            end_row: None,
            start_col: 1,
            end_col: end_col.max(1),
        }
    }

    pub fn column(collection: &str, start_row: u32, col: u32) -> Self {
        Self {
            collection: collection.to_string(),
            start_row,
            end_row: None,
            start_col: col,
            end_col: col,
        }
    }

    pub fn cell(collection: &str, row: u32, col: u32) -> Self {
        Self {
            collection: collection.to_string(),
            start_row: row,
            end_row: Some(row),
            start_col: col,
            end_col: col,
        }
    }

    /// A1 notation, e.g. `'Leads A'!B2:D`.
    pub fn to_a1(&self) -> String {
        let quoted = format!("'{}'", self.collection.replace('\'', "''"));
        let start = format!("{}{}", column_letters(self.start_col), self.start_row);
        let end = match self.end_row {
            Some(row) => format!("{}{}", column_letters(self.end_col), row),
            None => column_letters(self.end_col),
        };
        format!("{quoted}!{start}:{end}")
    }
}

pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueWrite {
    pub range: CellRange,
    pub values: Grid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub collection: String,
    pub start_row: u32,
    pub end_row: u32,
    pub column_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralEdit {
    AddCollection { name: String },
    AppendRows { collection: String, count: u32 },
    /// Content and formatting.
    CopyBlock { source: BlockRef, destination: BlockRef },
    DeleteRows {
        collection: String,
        start_row: u32,
        end_row: u32,
    },
}

impl StructuralEdit {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AddCollection { .. } => "add-collection",
            Self::AppendRows { .. } => "append-rows",
            Self::CopyBlock { .. } => "copy-block",
            Self::DeleteRows { .. } => "delete-rows",
        }
    }

    /// `false` for deletes: a re-sent one removes whatever row now sits at
    /// the position.
    pub fn is_replay_safe(&self) -> bool {
        !matches!(self, Self::DeleteRows { .. })
    }
}

pub trait TabularStore {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError>;

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError>;

    fn read_ranges(&self, ranges: &[CellRange]) -> Result<Vec<Grid>, StoreError> {
        ranges.iter().map(|range| self.read_range(range)).collect()
    }

    /// Applied atomically as one request.
    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError>;

    /// Applied in order as one request.
    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError>;
}

impl<S: TabularStore + ?Sized> TabularStore for &S {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        (**self).collections()
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        (**self).read_range(range)
    }

    fn read_ranges(&self, ranges: &[CellRange]) -> Result<Vec<Grid>, StoreError> {
        (**self).read_ranges(ranges)
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        (**self).write_values(writes)
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        (**self).apply_edits(edits)
    }
}

impl<S: TabularStore + ?Sized> TabularStore for Box<S> {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        (**self).collections()
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        (**self).read_range(range)
    }

    fn read_ranges(&self, ranges: &[CellRange]) -> Result<Vec<Grid>, StoreError> {
        (**self).read_ranges(ranges)
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        (**self).write_values(writes)
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        (**self).apply_edits(edits)
    }
}

/// Opens the configured backend. Retries are layered on by the caller.
pub fn open_store(cfg: &StoreConfig) -> Result<Box<dyn TabularStore>> {
    match cfg.backend {
        StoreBackend::Sheets => {
            let store = sheets::SheetsStore::from_env(&cfg.spreadsheet_id)
                .context("failed to configure sheets backend")?;
            Ok(Box::new(store))
        }
        StoreBackend::File => {
            let path = cfg
                .workbook_path
                .as_deref()
                .context("store.workbook_path is required for the file backend")?;
            let store = file::FileStore::open(path)
                .with_context(|| format!("failed to open workbook {}", path.display()))?;
            Ok(Box::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_cover_multi_letter_columns() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(52), "AZ");
        assert_eq!(column_letters(703), "AAA");
    }

    #[test]
    fn a1_quotes_collection_names() {
        let range = CellRange::rows("Bob's Leads", 2, 4);
        assert_eq!(range.to_a1(), "'Bob''s Leads'!A2:D");
        let cell = CellRange::cell("Leads", 5, 12);
        assert_eq!(cell.to_a1(), "'Leads'!L5:L5");
    }
}
