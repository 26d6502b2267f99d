/// One row inside a named collection. `cells` is blank-padded on read, so a
/// short row and the same row with trailing empty cells are the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub collection: String,
    pub position: u32,
    pub cells: Vec<String>,
    pub identity: String,
}

impl Record {
    pub fn new(collection: &str, position: u32, cells: Vec<String>, identity_column: u32) -> Self {
        let identity = cell_at(&cells, identity_column).trim().to_string();
        Self {
            collection: collection.to_string(),
            position,
            cells,
            identity,
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.identity.is_empty()
    }

    /// Cells as they will read once `identity` is written to `identity_column`.
    pub fn cells_with_identity(&self, identity_column: u32, identity: &str) -> Vec<String> {
        let mut cells = self.cells.clone();
        let idx = identity_column.saturating_sub(1) as usize;
        if cells.len() <= idx {
            cells.resize(idx + 1, String::new());
        }
        cells[idx] = identity.to_string();
        cells
    }

    pub fn checksum(&self) -> String {
        content_checksum(&self.cells)
    }
}

pub fn cell_at(cells: &[String], column: u32) -> &str {
    if column == 0 {
        return "";
    }
    cells
        .get(column as usize - 1)
        .map(String::as_str)
        .unwrap_or("")
}

/// Rolling 31-multiplier hash over the `|`-joined cell text, ignoring
/// trailing empty cells. A change detector only, not a security boundary.
pub fn content_checksum(cells: &[String]) -> String {
    let len = cells
        .iter()
        .rposition(|cell| !cell.is_empty())
        .map_or(0, |idx| idx + 1);
    let mut hash: u32 = 0;
    for (idx, cell) in cells[..len].iter().enumerate() {
        if idx > 0 {
            hash = hash.wrapping_mul(31).wrapping_add('|' as u32);
        }
        for ch in cell.chars() {
            hash = hash.wrapping_mul(31).wrapping_add(ch as u32);
        }
    }
    format!("{hash:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn checksum_ignores_trailing_blanks() {
        assert_eq!(
            content_checksum(&cells(&["a", "b"])),
            content_checksum(&cells(&["a", "b", "", ""]))
        );
    }

    #[test]
    fn checksum_detects_edits_and_cell_boundaries() {
        let base = content_checksum(&cells(&["ab", "c"]));
        assert_ne!(base, content_checksum(&cells(&["ab", "d"])));
        assert_ne!(base, content_checksum(&cells(&["a", "bc"])));
        assert_eq!(base.len(), 8);
    }

    #[test]
    fn record_reads_identity_from_configured_column() {
        let record = Record::new("A", 5, cells(&["x", "", " id-1 "]), 3);
        assert_eq!(record.identity, "id-1");
        assert!(record.has_identity());
        assert_eq!(cell_at(&record.cells, 9), "");

        let blank = Record::new("A", 6, cells(&["x"]), 3);
        assert!(!blank.has_identity());
        assert_eq!(blank.cells_with_identity(3, "id-2"), cells(&["x", "", "id-2"]));
    }
}
