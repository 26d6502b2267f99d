use crate::engine::config::MigrationConfig;
use crate::engine::record::{Record, cell_at};
use crate::error::StoreError;
use crate::store::{CellRange, CollectionMeta, TabularStore};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub meta: CollectionMeta,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct DestinationSnapshot {
    pub identities: BTreeSet<String>,
    pub next_free_row: u32,
}

#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub metas: Vec<CollectionMeta>,
    pub sources: Vec<SourceSnapshot>,
    pub destinations: BTreeMap<String, DestinationSnapshot>,
}

impl StoreSnapshot {
    pub fn meta(&self, name: &str) -> Option<&CollectionMeta> {
        find_meta(&self.metas, name)
    }
}

pub fn find_meta<'a>(metas: &'a [CollectionMeta], name: &str) -> Option<&'a CollectionMeta> {
    metas.iter().find(|meta| meta.name == name)
}

/// Columns to read so the identity column is always included.
pub fn read_width(meta: Option<&CollectionMeta>, identity_column: u32) -> u32 {
    meta.map_or(0, |m| m.column_count).max(identity_column).max(1)
}

/// Identities found in column `identity_column` of rows read from a destination.
pub fn identity_set(rows: &[Vec<String>], identity_column: u32) -> BTreeSet<String> {
    rows.iter()
        .map(|cells| cell_at(cells, identity_column).trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn take<S: TabularStore + ?Sized>(
    store: &S,
    cfg: &MigrationConfig,
) -> Result<StoreSnapshot, StoreError> {
    let settings = &cfg.migration;
    let identity_column = settings.identity_column;
    let first_data_row = settings.header_rows + 1;
    let metas = store.collections()?;

    let mut source_metas = Vec::with_capacity(settings.sources.len());
    for name in &settings.sources {
        let meta = find_meta(&metas, name).ok_or_else(|| {
            StoreError::permanent("snapshot", format!("source collection not found: {name}"))
        })?;
        source_metas.push(meta.clone());
    }
    let existing_destinations = settings
        .destinations
        .iter()
        .filter_map(|name| find_meta(&metas, name).cloned())
        .collect::<Vec<_>>();

    let ranges = source_metas
        .iter()
        .chain(existing_destinations.iter())
        .map(|meta| {
            CellRange::rows(&meta.name, first_data_row, read_width(Some(meta), identity_column))
        })
        .collect::<Vec<_>>();
    let mut grids = store.read_ranges(&ranges)?.into_iter();

    let mut sources = Vec::with_capacity(source_metas.len());
    for meta in source_metas {
        let grid = grids.next().unwrap_or_default();
        let records = grid
            .into_iter()
            .enumerate()
            .map(|(offset, cells)| {
                Record::new(&meta.name, first_data_row + offset as u32, cells, identity_column)
            })
            .collect();
        sources.push(SourceSnapshot { meta, records });
    }

    let mut destinations = BTreeMap::new();
    for meta in existing_destinations {
        let grid = grids.next().unwrap_or_default();
        let next_free_row = first_data_row + grid.len() as u32;
        destinations.insert(
            meta.name.clone(),
            DestinationSnapshot {
                identities: identity_set(&grid, identity_column),
                next_free_row,
            },
        );
    }
    for name in &settings.destinations {
        destinations
            .entry(name.clone())
            .or_insert_with(|| DestinationSnapshot {
                identities: BTreeSet::new(),
                next_free_row: first_data_row,
            });
    }

    tracing::info!(
        sources = sources.len(),
        records = sources.iter().map(|s| s.records.len()).sum::<usize>(),
        destinations = destinations.len(),
        "store snapshot taken"
    );
    Ok(StoreSnapshot {
        metas,
        sources,
        destinations,
    })
}
