use crate::engine::config::MigrationSettings;
use crate::engine::planner::MigrationPlanItem;
use crate::engine::record::content_checksum;
use crate::engine::snapshot::{find_meta, identity_set, read_width};
use crate::error::StoreError;
use crate::store::{CellRange, CollectionMeta, Grid, TabularStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetainReason {
    /// The destination does not (yet) show the identity.
    CopyNotVisible,
    /// The source row no longer matches its plan-time checksum.
    SourceChanged,
    /// The identity no longer appears anywhere in the source collection.
    SourceMissing,
    /// An earlier record in the same run already claimed this identity.
    DuplicateIdentity,
}

impl RetainReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopyNotVisible => "copy-not-visible",
            Self::SourceChanged => "source-changed",
            Self::SourceMissing => "source-missing",
            Self::DuplicateIdentity => "duplicate-identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetainedRecord {
    pub source_collection: String,
    pub source_position: u32,
    pub identity: String,
    pub reason: RetainReason,
}

#[derive(Debug, Default)]
pub struct Verification<'a> {
    pub admitted: Vec<&'a MigrationPlanItem>,
    pub retained: Vec<RetainedRecord>,
}

fn check(
    item: &MigrationPlanItem,
    settings: &MigrationSettings,
    destination_ids: &BTreeMap<&str, BTreeSet<String>>,
    source_rows: &BTreeMap<&str, Grid>,
    source_ids: &BTreeMap<&str, BTreeSet<String>>,
) -> Option<RetainReason> {
    if settings.require_destination_identity {
        let present = destination_ids
            .get(item.destination_collection.as_str())
            .is_some_and(|ids| ids.contains(&item.identity));
        if !present {
            return Some(RetainReason::CopyNotVisible);
        }
    }
    if settings.require_unchanged_checksum {
        let first_data_row = settings.header_rows + 1;
        let row = item
            .source_position
            .checked_sub(first_data_row)
            .and_then(|offset| {
                source_rows
                    .get(item.source_collection.as_str())
                    .and_then(|grid| grid.get(offset as usize))
            });
        if row.is_some_and(|row| content_checksum(row) == item.checksum_snapshot) {
            return None;
        }
        let still_listed = source_ids
            .get(item.source_collection.as_str())
            .is_some_and(|ids| ids.contains(&item.identity));
        return Some(if still_listed {
            RetainReason::SourceChanged
        } else {
            RetainReason::SourceMissing
        });
    }
    None
}

pub fn verify<'a, S: TabularStore + ?Sized>(
    store: &S,
    settings: &MigrationSettings,
    metas: &[CollectionMeta],
    candidates: &[&'a MigrationPlanItem],
) -> Result<Verification<'a>, StoreError> {
    if candidates.is_empty() {
        return Ok(Verification::default());
    }
    let first_data_row = settings.header_rows + 1;
    let identity_column = settings.identity_column;

    let destinations = if settings.require_destination_identity {
        candidates
            .iter()
            .map(|item| item.destination_collection.as_str())
            .collect::<BTreeSet<_>>()
    } else {
        BTreeSet::new()
    };
    let sources = if settings.require_unchanged_checksum {
        candidates
            .iter()
            .map(|item| item.source_collection.as_str())
            .collect::<BTreeSet<_>>()
    } else {
        BTreeSet::new()
    };

    let ranges = destinations
        .iter()
        .map(|name| CellRange::column(name, first_data_row, identity_column))
        .chain(sources.iter().map(|name| {
            CellRange::rows(
                name,
                first_data_row,
                read_width(find_meta(metas, name), identity_column),
            )
        }))
        .collect::<Vec<_>>();
    let mut grids = if ranges.is_empty() {
        Vec::new().into_iter()
    } else {
        store.read_ranges(&ranges)?.into_iter()
    };

    let destination_ids = destinations
        .iter()
        .map(|name| {
            let grid = grids.next().unwrap_or_default();
            // Column reads come back one cell wide.
            (*name, identity_set(&grid, 1))
        })
        .collect::<BTreeMap<_, _>>();
    let source_rows = sources
        .iter()
        .map(|name| (*name, grids.next().unwrap_or_default()))
        .collect::<BTreeMap<_, _>>();
    let source_ids = source_rows
        .iter()
        .map(|(name, grid)| (*name, identity_set(grid, identity_column)))
        .collect::<BTreeMap<_, _>>();

    let mut out = Verification::default();
    for item in candidates {
        match check(item, settings, &destination_ids, &source_rows, &source_ids) {
            None => out.admitted.push(*item),
            Some(reason) => {
                tracing::warn!(
                    source = %item.source_collection,
                    position = item.source_position,
                    identity = %item.identity,
                    destination = %item.destination_collection,
                    reason = reason.as_str(),
                    "retained for next run"
                );
                out.retained.push(RetainedRecord {
                    source_collection: item.source_collection.clone(),
                    source_position: item.source_position,
                    identity: item.identity.clone(),
                    reason,
                });
            }
        }
    }
    tracing::info!(
        admitted = out.admitted.len(),
        retained = out.retained.len(),
        "delete verification finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{config, store_with};

    fn item(position: u32, identity: &str, checksum_of: &[&str]) -> MigrationPlanItem {
        let cells = checksum_of.iter().map(|c| (*c).to_string()).collect::<Vec<_>>();
        MigrationPlanItem {
            source_collection: "Leads".into(),
            source_position: position,
            identity: identity.into(),
            checksum_snapshot: content_checksum(&cells),
            destination_collection: "Interested".into(),
            destination_position: Some(2),
        }
    }

    #[test]
    fn both_guards_must_pass() {
        let store = store_with(
            vec![
                vec!["d", "Interested", "id-1"],
                vec!["d", "Interested (edited)", "id-2"],
                vec!["d", "Interested", "id-3"],
            ],
            vec![
                vec!["d", "Interested", "id-1"],
                vec!["d", "Interested", "id-2"],
                vec!["d", "Interested", "id-5"],
            ],
            vec![],
        );
        let cfg = config();
        let metas = store.collections().expect("meta");
        let items = [
            item(2, "id-1", &["d", "Interested", "id-1"]),
            item(3, "id-2", &["d", "Interested", "id-2"]),
            item(4, "id-3", &["d", "Interested", "id-3"]),
            item(9, "id-1", &["d", "Interested", "id-1"]),
            item(4, "id-5", &["d", "Interested", "id-5"]),
        ];
        let refs = items.iter().collect::<Vec<_>>();
        let result = verify(&store, &cfg.migration, &metas, &refs).expect("verify");

        assert_eq!(result.admitted.len(), 1);
        assert_eq!(result.admitted[0].source_position, 2);
        let reasons = result
            .retained
            .iter()
            .map(|r| (r.source_position, r.reason))
            .collect::<Vec<_>>();
        assert_eq!(
            reasons,
            vec![
                (3, RetainReason::SourceChanged),
                (4, RetainReason::CopyNotVisible),
                (9, RetainReason::SourceChanged),
                (4, RetainReason::SourceMissing),
            ]
        );
    }

    #[test]
    fn disabled_guards_admit_without_reading() {
        let store = store_with(vec![vec!["d", "changed", "id-1"]], vec![], vec![]);
        let mut cfg = config();
        cfg.migration.require_destination_identity = false;
        cfg.migration.require_unchanged_checksum = false;
        let items = [item(2, "id-1", &["d", "Interested", "id-1"])];
        let refs = items.iter().collect::<Vec<_>>();
        let reads_before = store.stats().reads;

        let result = verify(&store, &cfg.migration, &[], &refs).expect("verify");
        assert_eq!(result.admitted.len(), 1);
        assert_eq!(store.stats().reads, reads_before);
    }
}
