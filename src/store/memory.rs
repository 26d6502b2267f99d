use crate::error::StoreError;
use crate::store::{
    BlockRef, CellRange, CollectionMeta, Grid, StructuralEdit, TabularStore, ValueWrite,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_GRID_ROWS: u32 = 1000;
pub const DEFAULT_GRID_COLUMNS: u32 = 26;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub collections: Vec<SheetData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetData {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
    /// Row formatting keyed by 1-based row position.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub formats: BTreeMap<u32, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub grid_rows: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub grid_columns: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl SheetData {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            rows: Vec::new(),
            formats: BTreeMap::new(),
            grid_rows: DEFAULT_GRID_ROWS,
            grid_columns: DEFAULT_GRID_COLUMNS,
        }
    }

    pub fn row_count(&self) -> u32 {
        self.grid_rows.max(self.rows.len() as u32)
    }

    pub fn column_count(&self) -> u32 {
        let widest = self.rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
        self.grid_columns.max(widest)
    }

    fn last_data_row(&self) -> u32 {
        self.rows
            .iter()
            .rposition(|row| row.iter().any(|cell| !cell.is_empty()))
            .map(|idx| idx as u32 + 1)
            .unwrap_or(0)
    }

    fn cell(&self, row: u32, col: u32) -> &str {
        self.rows
            .get(row as usize - 1)
            .and_then(|cells| cells.get(col as usize - 1))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn set_cell(&mut self, row: u32, col: u32, value: &str) {
        let row_idx = row as usize - 1;
        if self.rows.len() <= row_idx {
            self.rows.resize_with(row_idx + 1, Vec::new);
        }
        let cells = &mut self.rows[row_idx];
        let col_idx = col as usize - 1;
        if cells.len() <= col_idx {
            cells.resize(col_idx + 1, String::new());
        }
        cells[col_idx] = value.to_string();
    }

    fn delete_rows(&mut self, start_row: u32, end_row: u32) {
        let count = end_row - start_row + 1;
        let before = self.row_count();
        let start_idx = (start_row - 1) as usize;
        if start_idx < self.rows.len() {
            let end_idx = (end_row as usize).min(self.rows.len());
            self.rows.drain(start_idx..end_idx);
        }
        self.formats = std::mem::take(&mut self.formats)
            .into_iter()
            .filter(|(row, _)| *row < start_row || *row > end_row)
            .map(|(row, fmt)| if row > end_row { (row - count, fmt) } else { (row, fmt) })
            .collect();
        self.grid_rows = before.saturating_sub(count);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: usize,
    pub value_writes: usize,
    pub edit_batches: usize,
    pub copies: usize,
    pub deletes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    workbook: Workbook,
    stats: StoreStats,
}

impl MemoryStore {
    pub fn new(mut workbook: Workbook) -> Self {
        normalize_ids(&mut workbook);
        for sheet in &mut workbook.collections {
            sheet.grid_rows = sheet.row_count();
            if sheet.grid_columns == 0 {
                sheet.grid_columns = DEFAULT_GRID_COLUMNS;
            }
        }
        Self {
            inner: Mutex::new(Inner {
                workbook,
                stats: StoreStats::default(),
            }),
        }
    }

    #[cfg(test)]
    pub fn from_rows(collections: &[(&str, Vec<Vec<&str>>)]) -> Self {
        let workbook = Workbook {
            collections: collections
                .iter()
                .enumerate()
                .map(|(idx, (name, rows))| SheetData {
                    id: idx as i64,
                    name: (*name).to_string(),
                    rows: rows
                        .iter()
                        .map(|row| row.iter().map(|cell| (*cell).to_string()).collect())
                        .collect(),
                    ..SheetData::default()
                })
                .collect(),
        };
        Self::new(workbook)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn workbook(&self) -> Workbook {
        self.lock().workbook.clone()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Data rows of one collection with trailing blanks trimmed, for assertions.
    #[cfg(test)]
    pub fn rows(&self, collection: &str) -> Vec<Vec<String>> {
        let inner = self.lock();
        let Some(sheet) = find(&inner.workbook, collection) else {
            return Vec::new();
        };
        let last = sheet.last_data_row() as usize;
        sheet.rows[..last].iter().map(|row| trim_row(row)).collect()
    }

    #[cfg(test)]
    pub fn format_of(&self, collection: &str, row: u32) -> Option<String> {
        let inner = self.lock();
        find(&inner.workbook, collection).and_then(|sheet| sheet.formats.get(&row).cloned())
    }

    #[cfg(test)]
    pub fn set_format(&self, collection: &str, row: u32, format: &str) {
        let mut inner = self.lock();
        if let Some(sheet) = find_mut(&mut inner.workbook, collection) {
            sheet.formats.insert(row, format.to_string());
        }
    }

    /// Direct cell edit that bypasses stats, standing in for a human editing the store.
    #[cfg(test)]
    pub fn set_cell(&self, collection: &str, row: u32, col: u32, value: &str) {
        let mut inner = self.lock();
        if let Some(sheet) = find_mut(&mut inner.workbook, collection) {
            sheet.set_cell(row, col, value);
        }
    }
}

fn normalize_ids(workbook: &mut Workbook) {
    let mut seen = std::collections::BTreeSet::new();
    let unique = workbook.collections.iter().all(|sheet| seen.insert(sheet.id));
    if !unique {
        for (idx, sheet) in workbook.collections.iter_mut().enumerate() {
            sheet.id = idx as i64;
        }
    }
}

fn find<'a>(workbook: &'a Workbook, name: &str) -> Option<&'a SheetData> {
    workbook.collections.iter().find(|sheet| sheet.name == name)
}

fn find_mut<'a>(workbook: &'a mut Workbook, name: &str) -> Option<&'a mut SheetData> {
    workbook.collections.iter_mut().find(|sheet| sheet.name == name)
}

fn trim_row(row: &[String]) -> Vec<String> {
    let len = row.iter().rposition(|cell| !cell.is_empty()).map_or(0, |idx| idx + 1);
    row[..len].to_vec()
}

fn missing(op: &str, name: &str) -> StoreError {
    StoreError::permanent(op, format!("collection not found: {name}"))
}

fn check_range(op: &str, range: &CellRange) -> Result<(), StoreError> {
    let rows_ok = range.start_row >= 1 && range.end_row.is_none_or(|end| end >= range.start_row);
    if !rows_ok || range.start_col < 1 || range.end_col < range.start_col {
        return Err(StoreError::permanent(
            op,
            format!("invalid range {}", range.to_a1()),
        ));
    }
    Ok(())
}

fn read_sheet_range(sheet: &SheetData, range: &CellRange) -> Grid {
    let end_row = range.end_row.unwrap_or_else(|| sheet.last_data_row());
    let mut grid = Vec::new();
    for row in range.start_row..=end_row {
        let cells = (range.start_col..=range.end_col)
            .map(|col| sheet.cell(row, col).to_string())
            .collect::<Vec<_>>();
        grid.push(trim_row(&cells));
    }
    while grid.last().is_some_and(Vec::is_empty) {
        grid.pop();
    }
    grid
}

fn copy_block(
    workbook: &mut Workbook,
    source: &BlockRef,
    destination: &BlockRef,
) -> Result<(), StoreError> {
    const OP: &str = "copy-block";
    let src = find(workbook, &source.collection).ok_or_else(|| missing(OP, &source.collection))?;
    let height = source.end_row.saturating_sub(source.start_row) + 1;
    let width = source.column_count.max(1);
    let mut rows = Vec::with_capacity(height as usize);
    for offset in 0..height {
        let row = source.start_row + offset;
        let cells = (1..=width)
            .map(|col| src.cell(row, col).to_string())
            .collect::<Vec<_>>();
        rows.push((cells, src.formats.get(&row).cloned()));
    }

    let dest = find_mut(workbook, &destination.collection)
        .ok_or_else(|| missing(OP, &destination.collection))?;
    let dest_end = destination.start_row + height - 1;
    if dest_end > dest.row_count() {
        return Err(StoreError::permanent(
            OP,
            format!(
                "row {dest_end} exceeds grid limits of {} ({} rows)",
                destination.collection,
                dest.row_count()
            ),
        ));
    }
    for (offset, (cells, format)) in rows.into_iter().enumerate() {
        let row = destination.start_row + offset as u32;
        for (idx, value) in cells.iter().enumerate() {
            dest.set_cell(row, idx as u32 + 1, value);
        }
        match format {
            Some(fmt) => {
                dest.formats.insert(row, fmt);
            }
            None => {
                dest.formats.remove(&row);
            }
        }
    }
    dest.grid_columns = dest.grid_columns.max(width);
    Ok(())
}

fn apply_edit(workbook: &mut Workbook, edit: &StructuralEdit) -> Result<(), StoreError> {
    let op = edit.label();
    match edit {
        StructuralEdit::AddCollection { name } => {
            if find(workbook, name).is_some() {
                return Err(StoreError::permanent(
                    op,
                    format!("a collection named {name} already exists"),
                ));
            }
            let next_id = workbook.collections.iter().map(|s| s.id).max().map_or(0, |id| id + 1);
            workbook.collections.push(SheetData::new(next_id, name));
        }
        StructuralEdit::AppendRows { collection, count } => {
            let sheet = find_mut(workbook, collection).ok_or_else(|| missing(op, collection))?;
            sheet.grid_rows = sheet.row_count() + count;
        }
        StructuralEdit::CopyBlock {
            source,
            destination,
        } => copy_block(workbook, source, destination)?,
        StructuralEdit::DeleteRows {
            collection,
            start_row,
            end_row,
        } => {
            let sheet = find_mut(workbook, collection).ok_or_else(|| missing(op, collection))?;
            if *start_row < 1 || end_row < start_row || *end_row > sheet.row_count() {
                return Err(StoreError::permanent(
                    op,
                    format!("rows {start_row}..={end_row} out of bounds in {collection}"),
                ));
            }
            sheet.delete_rows(*start_row, *end_row);
        }
    }
    Ok(())
}

impl TabularStore for MemoryStore {
    fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
        let mut inner = self.lock();
        inner.stats.reads += 1;
        Ok(inner
            .workbook
            .collections
            .iter()
            .map(|sheet| CollectionMeta {
                id: sheet.id,
                name: sheet.name.clone(),
                row_count: sheet.row_count(),
                column_count: sheet.column_count(),
            })
            .collect())
    }

    fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
        const OP: &str = "read-range";
        check_range(OP, range)?;
        let mut inner = self.lock();
        inner.stats.reads += 1;
        let sheet =
            find(&inner.workbook, &range.collection).ok_or_else(|| missing(OP, &range.collection))?;
        Ok(read_sheet_range(sheet, range))
    }

    fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
        const OP: &str = "write-values";
        let mut inner = self.lock();
        for write in writes {
            check_range(OP, &write.range)?;
            if find(&inner.workbook, &write.range.collection).is_none() {
                return Err(missing(OP, &write.range.collection));
            }
        }
        inner.stats.value_writes += 1;
        for write in writes {
            let Some(sheet) = find_mut(&mut inner.workbook, &write.range.collection) else {
                continue;
            };
            for (row_offset, values) in write.values.iter().enumerate() {
                let row = write.range.start_row + row_offset as u32;
                for (col_offset, value) in values.iter().enumerate() {
                    sheet.set_cell(row, write.range.start_col + col_offset as u32, value);
                }
            }
        }
        Ok(())
    }

    fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        // Batches are all-or-nothing: stage on a copy and swap in on success.
        let mut staged = inner.workbook.clone();
        for edit in edits {
            apply_edit(&mut staged, edit)?;
        }
        inner.workbook = staged;
        inner.stats.edit_batches += 1;
        for edit in edits {
            match edit {
                StructuralEdit::CopyBlock { .. } => inner.stats.copies += 1,
                StructuralEdit::DeleteRows { .. } => inner.stats.deletes += 1,
                _ => {}
            }
        }
        Ok(())
    }
}
