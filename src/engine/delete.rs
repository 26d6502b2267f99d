use crate::engine::config::MigrationSettings;
use crate::engine::planner::MigrationPlanItem;
use crate::engine::verify::{self, RetainReason, RetainedRecord};
use crate::error::StoreError;
use crate::store::{CollectionMeta, StructuralEdit, TabularStore};
use std::collections::{BTreeMap, BTreeSet};

/// Delete requests sent per run, counting the first.
pub const MAX_DELETE_SUBMISSIONS: u32 = 3;

#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub retained: Vec<RetainedRecord>,
}

/// Grouped per source collection, highest position first, so earlier
/// deletions in the batch never shift the rows still pending.
pub fn build_batch(admitted: &[&MigrationPlanItem]) -> Vec<StructuralEdit> {
    let mut by_collection: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    for item in admitted {
        by_collection
            .entry(item.source_collection.as_str())
            .or_default()
            .insert(item.source_position);
    }

    by_collection
        .into_iter()
        .flat_map(|(collection, positions)| {
            positions
                .into_iter()
                .rev()
                .map(move |row| StructuralEdit::DeleteRows {
                    collection: collection.to_string(),
                    start_row: row,
                    end_row: row,
                })
        })
        .collect()
}

pub fn commit<S: TabularStore + ?Sized>(
    store: &S,
    admitted: &[&MigrationPlanItem],
) -> Result<usize, StoreError> {
    let edits = build_batch(admitted);
    if edits.is_empty() {
        return Ok(0);
    }
    store.apply_edits(&edits)?;
    tracing::info!(deleted = edits.len(), "delete batch committed");
    Ok(edits.len())
}

/// After a transient failure the batch is never re-sent as is. Pending items
/// are verified again against fresh reads with the content check forced on,
/// and only rows still holding their planned content are resubmitted. An
/// item whose identity has left the source counts as deleted.
pub fn commit_verified<'a, S: TabularStore + ?Sized>(
    store: &S,
    settings: &MigrationSettings,
    metas: &[CollectionMeta],
    admitted: Vec<&'a MigrationPlanItem>,
) -> Result<DeleteOutcome, StoreError> {
    let strict = MigrationSettings {
        require_unchanged_checksum: true,
        ..settings.clone()
    };
    let mut out = DeleteOutcome::default();
    let mut pending = admitted;
    let mut submission = 1;
    loop {
        let err = match commit(store, &pending) {
            Ok(deleted) => {
                out.deleted += deleted;
                return Ok(out);
            }
            Err(err) if err.is_transient() && submission < MAX_DELETE_SUBMISSIONS => err,
            Err(err) => return Err(err),
        };
        tracing::warn!(
            error = %err,
            submission,
            pending = pending.len(),
            "delete outcome unknown, re-verifying before resubmitting"
        );

        let fresh = verify::verify(store, &strict, metas, &pending)?;
        for record in fresh.retained {
            if record.reason == RetainReason::SourceMissing {
                out.deleted += 1;
            } else {
                out.retained.push(record);
            }
        }
        if fresh.admitted.is_empty() {
            return Ok(out);
        }
        pending = fresh.admitted;
        submission += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::content_checksum;
    use crate::engine::test_support::{config, store_with};
    use crate::store::memory::MemoryStore;
    use crate::store::{CellRange, Grid, ValueWrite};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails delete batches with a transient error. With `applied` set the
    /// batch lands first, as when the acknowledgement is lost in transit.
    struct LossyDeletes {
        inner: MemoryStore,
        failures: AtomicUsize,
        applied: bool,
    }

    impl TabularStore for LossyDeletes {
        fn collections(&self) -> Result<Vec<CollectionMeta>, StoreError> {
            self.inner.collections()
        }
        fn read_range(&self, range: &CellRange) -> Result<Grid, StoreError> {
            self.inner.read_range(range)
        }
        fn write_values(&self, writes: &[ValueWrite]) -> Result<(), StoreError> {
            self.inner.write_values(writes)
        }
        fn apply_edits(&self, edits: &[StructuralEdit]) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) == 0 {
                return self.inner.apply_edits(edits);
            }
            self.failures.fetch_sub(1, Ordering::SeqCst);
            if self.applied {
                self.inner.apply_edits(edits)?;
            }
            Err(StoreError::transient("apply-edits", "connection reset"))
        }
    }

    fn planned(position: u32, cells: &[&str]) -> MigrationPlanItem {
        let cells = cells.iter().map(|c| (*c).to_string()).collect::<Vec<_>>();
        MigrationPlanItem {
            source_collection: "Leads".into(),
            source_position: position,
            identity: cells[2].clone(),
            checksum_snapshot: content_checksum(&cells),
            destination_collection: "Interested".into(),
            destination_position: Some(2),
        }
    }

    fn lossy(applied: bool, failures: usize) -> LossyDeletes {
        LossyDeletes {
            inner: store_with(
                vec![
                    vec!["a", "Interested", "id-a"],
                    vec!["b", "new lead, never classified"],
                    vec!["c", "Interested", "id-c"],
                ],
                vec![vec!["a", "Interested", "id-a"], vec!["c", "Interested", "id-c"]],
                vec![],
            ),
            failures: AtomicUsize::new(failures),
            applied,
        }
    }

    fn item(collection: &str, position: u32) -> MigrationPlanItem {
        MigrationPlanItem {
            source_collection: collection.into(),
            source_position: position,
            identity: format!("id-{position}"),
            checksum_snapshot: String::new(),
            destination_collection: "Interested".into(),
            destination_position: None,
        }
    }

    fn positions(edits: &[StructuralEdit], collection: &str) -> Vec<u32> {
        edits
            .iter()
            .filter_map(|e| match e {
                StructuralEdit::DeleteRows {
                    collection: c,
                    start_row,
                    ..
                } if c == collection => Some(*start_row),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn deletions_are_strictly_descending_per_collection() {
        let items = [
            item("A", 3),
            item("B", 4),
            item("A", 7),
            item("A", 2),
            item("B", 6),
            item("A", 9),
        ];
        let refs = items.iter().collect::<Vec<_>>();
        let edits = build_batch(&refs);
        assert_eq!(positions(&edits, "A"), vec![9, 7, 3, 2]);
        assert_eq!(positions(&edits, "B"), vec![6, 4]);
    }

    #[test]
    fn survivors_keep_their_relative_order() {
        let rows = (1..=10).map(|n| vec![format!("r{n}")]).collect::<Vec<_>>();
        let store = MemoryStore::from_rows(&[(
            "A",
            rows.iter().map(|r| vec![r[0].as_str()]).collect(),
        )]);
        let items = [item("A", 3), item("A", 7), item("A", 2), item("A", 9)];
        let refs = items.iter().collect::<Vec<_>>();

        assert_eq!(commit(&store, &refs).expect("commit"), 4);
        assert_eq!(store.stats().edit_batches, 1);
        let remaining = store
            .rows("A")
            .into_iter()
            .map(|r| r[0].clone())
            .collect::<Vec<_>>();
        assert_eq!(remaining, vec!["r1", "r4", "r5", "r6", "r8", "r10"]);
    }

    #[test]
    fn lost_acknowledgement_is_not_replayed_onto_shifted_rows() {
        let store = lossy(true, 1);
        let cfg = config();
        let metas = store.collections().expect("meta");
        let items = [
            planned(2, &["a", "Interested", "id-a"]),
            planned(4, &["c", "Interested", "id-c"]),
        ];

        let outcome = commit_verified(&store, &cfg.migration, &metas, items.iter().collect())
            .expect("recovered");
        assert_eq!(outcome.deleted, 2);
        assert!(outcome.retained.is_empty());
        assert_eq!(store.inner.stats().deletes, 2);
        assert_eq!(
            store.inner.rows("Leads")[1],
            vec!["b", "new lead, never classified"]
        );
    }

    #[test]
    fn unapplied_batch_is_resubmitted_after_verification() {
        let store = lossy(false, 1);
        let cfg = config();
        let metas = store.collections().expect("meta");
        let items = [
            planned(2, &["a", "Interested", "id-a"]),
            planned(4, &["c", "Interested", "id-c"]),
        ];

        let outcome = commit_verified(&store, &cfg.migration, &metas, items.iter().collect())
            .expect("resubmitted");
        assert_eq!(outcome.deleted, 2);
        assert_eq!(store.inner.rows("Leads").len(), 2);
    }

    #[test]
    fn persistent_delete_failures_surface_after_bounded_submissions() {
        let store = lossy(false, 10);
        let cfg = config();
        let metas = store.collections().expect("meta");
        let items = [planned(2, &["a", "Interested", "id-a"])];

        let err = commit_verified(&store, &cfg.migration, &metas, items.iter().collect())
            .expect_err("gives up");
        assert!(err.is_transient());
        assert_eq!(
            store.failures.load(Ordering::SeqCst),
            10 - MAX_DELETE_SUBMISSIONS as usize
        );
        assert_eq!(store.inner.rows("Leads").len(), 4);
    }
}
