use crate::engine::classify::classify;
use crate::engine::config::{MigrationConfig, MigrationMode};
use crate::engine::identity::{IdentityAssignment, IdentitySource, ensure_identity};
use crate::engine::record::content_checksum;
use crate::engine::snapshot::StoreSnapshot;
use crate::engine::verify::{RetainReason, RetainedRecord};
use serde::Serialize;
use std::collections::BTreeSet;

/// Immutable intent to move one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlanItem {
    pub source_collection: String,
    pub source_position: u32,
    pub identity: String,
    pub checksum_snapshot: String,
    pub destination_collection: String,
    /// `None` when the destination already holds this identity. Such items
    /// are reported only; they are neither copied nor deleted.
    pub destination_position: Option<u32>,
}

impl MigrationPlanItem {
    pub fn needs_copy(&self) -> bool {
        self.destination_position.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub items: Vec<MigrationPlanItem>,
    pub identity_writes: Vec<IdentityAssignment>,
    pub classified: usize,
    pub no_match: usize,
    pub already_present: usize,
    pub delete_candidates: Vec<usize>,
    /// Records left untouched because an earlier record in this run carries
    /// the same identity.
    pub duplicates: Vec<RetainedRecord>,
}

impl MigrationPlan {
    pub fn copies(&self) -> impl Iterator<Item = &MigrationPlanItem> {
        self.items.iter().filter(|item| item.needs_copy())
    }

    pub fn copy_count(&self) -> usize {
        self.copies().count()
    }

    pub fn delete_candidate_items(&self) -> Vec<&MigrationPlanItem> {
        self.delete_candidates.iter().map(|idx| &self.items[*idx]).collect()
    }
}

pub fn plan(
    cfg: &MigrationConfig,
    snapshot: &StoreSnapshot,
    identities: &mut dyn IdentitySource,
) -> MigrationPlan {
    let settings = &cfg.migration;
    let mut destinations = snapshot.destinations.clone();
    let mut claimed = BTreeSet::new();
    let mut out = MigrationPlan::default();

    for source in &snapshot.sources {
        for record in &source.records {
            if record.cells.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let Some(destination) = classify(&record.cells, &cfg.rules) else {
                out.no_match += 1;
                continue;
            };
            out.classified += 1;

            let (identity, staged) = ensure_identity(record, identities);
            if !claimed.insert(identity.clone()) {
                tracing::warn!(
                    source = %record.collection,
                    position = record.position,
                    identity = %identity,
                    "identity already claimed by an earlier record in this run, left in place"
                );
                out.duplicates.push(RetainedRecord {
                    source_collection: record.collection.clone(),
                    source_position: record.position,
                    identity,
                    reason: RetainReason::DuplicateIdentity,
                });
                continue;
            }
            let checksum_snapshot = match &staged {
                Some(_) => content_checksum(
                    &record.cells_with_identity(settings.identity_column, &identity),
                ),
                None => record.checksum(),
            };
            if let Some(assignment) = staged {
                out.identity_writes.push(assignment);
            }

            // Config validation guarantees every rule destination is declared.
            let Some(dest) = destinations.get_mut(destination) else {
                continue;
            };
            let destination_position = if dest.identities.contains(&identity) {
                out.already_present += 1;
                None
            } else {
                let position = dest.next_free_row;
                dest.next_free_row += 1;
                Some(position)
            };

            tracing::debug!(
                source = %record.collection,
                position = record.position,
                identity = %identity,
                destination,
                ?destination_position,
                "planned"
            );
            if settings.mode == MigrationMode::Move && destination_position.is_some() {
                out.delete_candidates.push(out.items.len());
            }
            out.items.push(MigrationPlanItem {
                source_collection: record.collection.clone(),
                source_position: record.position,
                identity,
                checksum_snapshot,
                destination_collection: destination.to_string(),
                destination_position,
            });
        }
    }

    tracing::info!(
        classified = out.classified,
        no_match = out.no_match,
        copies = out.copy_count(),
        already_present = out.already_present,
        duplicates = out.duplicates.len(),
        identities_minted = out.identity_writes.len(),
        "plan computed"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::identity::SequentialIdentitySource;
    use crate::engine::snapshot;
    use crate::engine::test_support::{config, store_with};

    #[test]
    fn records_get_sequential_append_positions_per_destination() {
        let store = store_with(
            vec![
                vec!["d", "Interested", ""],
                vec!["d", "nothing", ""],
                vec!["d", "interested", ""],
                vec!["d", "meeting set", ""],
            ],
            vec![vec!["old", "Interested", "id-old"]],
            vec![],
        );
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let mut ids = SequentialIdentitySource::default();
        let plan = plan(&cfg, &snap, &mut ids);

        assert_eq!(plan.classified, 3);
        assert_eq!(plan.no_match, 1);
        assert_eq!(plan.identity_writes.len(), 3);
        let positions = plan
            .items
            .iter()
            .map(|i| (i.destination_collection.as_str(), i.destination_position))
            .collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![
                ("Interested", Some(3)),
                ("Interested", Some(4)),
                ("Meeting Set", Some(2)),
            ]
        );
        assert_eq!(plan.delete_candidates, vec![0, 1, 2]);
    }

    #[test]
    fn identity_already_at_destination_is_not_copied_again() {
        let store = store_with(
            vec![vec!["d", "Interested", "id-7"]],
            vec![vec!["d", "Interested", "id-7"]],
            vec![],
        );
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        assert_eq!(plan.copy_count(), 0);
        assert_eq!(plan.already_present, 1);
        assert!(plan.identity_writes.is_empty());
        assert_eq!(plan.items[0].destination_position, None);
        assert!(plan.delete_candidate_items().is_empty());
    }

    #[test]
    fn second_record_with_a_claimed_identity_is_left_alone() {
        let store = store_with(
            vec![
                vec!["d", "Interested", "id-dup"],
                vec!["e", "Interested other lead", "id-dup"],
            ],
            vec![],
            vec![],
        );
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        assert_eq!(plan.classified, 2);
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.copy_count(), 1);
        assert_eq!(plan.delete_candidates, vec![0]);
        assert_eq!(plan.items[0].source_position, 2);
        assert_eq!(plan.duplicates.len(), 1);
        assert_eq!(plan.duplicates[0].source_position, 3);
        assert_eq!(plan.duplicates[0].reason, RetainReason::DuplicateIdentity);
    }

    #[test]
    fn claimed_identity_blocks_a_second_destination_too() {
        let store = store_with(
            vec![
                vec!["d", "Interested", "id-dup"],
                vec!["e", "meeting set", "id-dup"],
            ],
            vec![],
            vec![],
        );
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        assert_eq!(plan.copy_count(), 1);
        assert_eq!(plan.items[0].destination_collection, "Interested");
        assert_eq!(plan.duplicates.len(), 1);
    }

    #[test]
    fn checksum_snapshot_includes_minted_identity() {
        let store = store_with(vec![vec!["d", "Interested"]], vec![], vec![]);
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        let expected = content_checksum(&[
            "d".to_string(),
            "Interested".to_string(),
            "id-000001".to_string(),
        ]);
        assert_eq!(plan.items[0].checksum_snapshot, expected);
    }

    #[test]
    fn copy_only_mode_elects_no_delete_candidates() {
        let store = store_with(vec![vec!["d", "Interested"]], vec![], vec![]);
        let mut cfg = config();
        cfg.migration.mode = MigrationMode::CopyOnly;
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        assert_eq!(plan.copy_count(), 1);
        assert!(plan.delete_candidates.is_empty());
    }

    #[test]
    fn blank_rows_are_ignored() {
        let store = store_with(vec![vec!["", "  ", ""], vec!["d", "Interested"]], vec![], vec![]);
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        assert_eq!(plan.no_match, 0);
        assert_eq!(plan.items[0].source_position, 3);
    }
}
