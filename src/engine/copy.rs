use crate::engine::planner::MigrationPlanItem;
use crate::engine::snapshot::{find_meta, read_width};
use crate::error::StoreError;
use crate::store::{BlockRef, CollectionMeta, StructuralEdit, TabularStore};
use std::collections::BTreeMap;

/// Grid growth first, then one `CopyBlock` per item in plan order.
pub fn build_batch(
    items: &[&MigrationPlanItem],
    metas: &[CollectionMeta],
    identity_column: u32,
) -> Vec<StructuralEdit> {
    let mut needed_rows: BTreeMap<&str, u32> = BTreeMap::new();
    let mut copies = Vec::with_capacity(items.len());

    for item in items {
        let Some(position) = item.destination_position else {
            continue;
        };
        let needed = needed_rows
            .entry(item.destination_collection.as_str())
            .or_default();
        *needed = (*needed).max(position);

        let width = read_width(find_meta(metas, &item.source_collection), identity_column);
        copies.push(StructuralEdit::CopyBlock {
            source: BlockRef {
                collection: item.source_collection.clone(),
                start_row: item.source_position,
                end_row: item.source_position,
                column_count: width,
            },
            destination: BlockRef {
                collection: item.destination_collection.clone(),
                start_row: position,
                end_row: position,
                column_count: width,
            },
        });
    }

    let mut edits = needed_rows
        .into_iter()
        .filter_map(|(collection, needed)| {
            let have = find_meta(metas, collection).map_or(0, |m| m.row_count);
            (needed > have).then(|| StructuralEdit::AppendRows {
                collection: collection.to_string(),
                count: needed - have,
            })
        })
        .collect::<Vec<_>>();
    edits.extend(copies);
    edits
}

/// Commits every copy or none. Returns the number of rows copied.
pub fn commit<S: TabularStore + ?Sized>(
    store: &S,
    items: &[&MigrationPlanItem],
    metas: &[CollectionMeta],
    identity_column: u32,
) -> Result<usize, StoreError> {
    let edits = build_batch(items, metas, identity_column);
    let copied = edits
        .iter()
        .filter(|edit| matches!(edit, StructuralEdit::CopyBlock { .. }))
        .count();
    if copied == 0 {
        return Ok(0);
    }
    store.apply_edits(&edits)?;
    tracing::info!(copied, "copy batch committed");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source_position: u32, destination: &str, position: Option<u32>) -> MigrationPlanItem {
        MigrationPlanItem {
            source_collection: "Leads".into(),
            source_position,
            identity: format!("id-{source_position}"),
            checksum_snapshot: "00000000".into(),
            destination_collection: destination.into(),
            destination_position: position,
        }
    }

    fn meta(id: i64, name: &str, rows: u32) -> CollectionMeta {
        CollectionMeta {
            id,
            name: name.into(),
            row_count: rows,
            column_count: 5,
        }
    }

    #[test]
    fn batch_grows_small_grids_before_copying() {
        let items = [
            item(2, "Interested", Some(10)),
            item(3, "Interested", Some(11)),
            item(4, "Meeting Set", Some(3)),
            item(5, "Meeting Set", None),
        ];
        let refs = items.iter().collect::<Vec<_>>();
        let metas = vec![
            meta(0, "Leads", 20),
            meta(1, "Interested", 10),
            meta(2, "Meeting Set", 100),
        ];
        let edits = build_batch(&refs, &metas, 7);

        assert_eq!(
            edits[0],
            StructuralEdit::AppendRows {
                collection: "Interested".into(),
                count: 1
            }
        );
        let copies = edits
            .iter()
            .filter_map(|e| match e {
                StructuralEdit::CopyBlock {
                    source,
                    destination,
                } => Some((source.start_row, destination.start_row, source.column_count)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(copies, vec![(2, 10, 7), (3, 11, 7), (4, 3, 7)]);
    }

    #[test]
    fn nothing_to_copy_issues_no_request() {
        use crate::store::memory::MemoryStore;
        let store = MemoryStore::from_rows(&[("Leads", vec![vec!["x"]])]);
        let items = [item(2, "Interested", None)];
        let refs = items.iter().collect::<Vec<_>>();
        assert_eq!(commit(&store, &refs, &[], 3).expect("commit"), 0);
        assert_eq!(store.stats().edit_batches, 0);
    }
}
