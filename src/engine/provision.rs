use crate::engine::config::MigrationConfig;
use crate::engine::planner::MigrationPlan;
use crate::engine::snapshot::{StoreSnapshot, read_width};
use crate::error::StoreError;
use crate::store::{BlockRef, StructuralEdit, TabularStore};
use std::collections::BTreeSet;

pub fn missing_destinations(plan: &MigrationPlan, snapshot: &StoreSnapshot) -> Vec<String> {
    plan.copies()
        .map(|item| item.destination_collection.as_str())
        .filter(|name| snapshot.meta(name).is_none())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn build_batch(
    cfg: &MigrationConfig,
    snapshot: &StoreSnapshot,
    missing: &[String],
) -> Vec<StructuralEdit> {
    let header_rows = cfg.migration.header_rows;
    let header_source = snapshot.sources.first().map(|s| &s.meta);
    let mut edits = missing
        .iter()
        .map(|name| StructuralEdit::AddCollection { name: name.clone() })
        .collect::<Vec<_>>();
    if header_rows == 0 {
        return edits;
    }
    if let Some(meta) = header_source {
        let width = read_width(Some(meta), cfg.migration.identity_column);
        for name in missing {
            edits.push(StructuralEdit::CopyBlock {
                source: BlockRef {
                    collection: meta.name.clone(),
                    start_row: 1,
                    end_row: header_rows,
                    column_count: width,
                },
                destination: BlockRef {
                    collection: name.clone(),
                    start_row: 1,
                    end_row: header_rows,
                    column_count: width,
                },
            });
        }
    }
    edits
}

/// Returns the names created. Fails without writing when creation is disabled.
pub fn ensure_destinations<S: TabularStore + ?Sized>(
    store: &S,
    cfg: &MigrationConfig,
    plan: &MigrationPlan,
    snapshot: &StoreSnapshot,
) -> Result<Vec<String>, StoreError> {
    let missing = missing_destinations(plan, snapshot);
    if missing.is_empty() {
        return Ok(missing);
    }
    if !cfg.migration.create_missing_destinations {
        return Err(StoreError::permanent(
            "provision",
            format!(
                "destination collection(s) missing and creation disabled: {}",
                missing.join(", ")
            ),
        ));
    }
    store.apply_edits(&build_batch(cfg, snapshot, &missing))?;
    tracing::info!(created = %missing.join(","), "destination collections created");
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::identity::SequentialIdentitySource;
    use crate::engine::planner::plan;
    use crate::engine::snapshot;
    use crate::engine::test_support::{HEADER, config};
    use crate::store::memory::MemoryStore;

    fn leads_only() -> MemoryStore {
        MemoryStore::from_rows(&[(
            "Leads",
            vec![HEADER.to_vec(), vec!["d", "Interested"], vec!["d", "nope"]],
        )])
    }

    #[test]
    fn missing_destination_is_created_with_header() {
        let store = leads_only();
        let cfg = config();
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        let created = ensure_destinations(&store, &cfg, &plan, &snap).expect("provision");
        assert_eq!(created, vec!["Interested"]);
        assert_eq!(store.rows("Interested"), vec![HEADER.to_vec()]);
        // Meeting Set is declared but nothing targets it.
        assert!(store.rows("Meeting Set").is_empty());
        assert_eq!(store.stats().edit_batches, 1);
    }

    #[test]
    fn disabled_creation_fails_before_any_write() {
        let store = leads_only();
        let mut cfg = config();
        cfg.migration.create_missing_destinations = false;
        let snap = snapshot::take(&store, &cfg).expect("snapshot");
        let plan = plan(&cfg, &snap, &mut SequentialIdentitySource::default());

        let err = ensure_destinations(&store, &cfg, &plan, &snap).expect_err("disabled");
        assert!(!err.is_transient());
        assert_eq!(store.stats().edit_batches, 0);
    }
}
