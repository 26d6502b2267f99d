use crate::engine::record::Record;
use crate::error::StoreError;
use crate::store::{CellRange, TabularStore, ValueWrite};
use rand::Rng;

pub trait IdentitySource {
    fn next_identity(&mut self) -> String;
}

/// `id-<millis hex>-<32 random bits hex>`. Millis never repeat or go
/// backwards within one source, even if the wall clock does.
#[derive(Debug, Default)]
pub struct ClockIdentitySource {
    last_millis: i64,
}

impl IdentitySource for ClockIdentitySource {
    fn next_identity(&mut self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let millis = if now > self.last_millis {
            now
        } else {
            self.last_millis + 1
        };
        self.last_millis = millis;
        let entropy: u32 = rand::thread_rng().r#gen();
        format!("id-{millis:x}-{entropy:08x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAssignment {
    pub collection: String,
    pub position: u32,
    pub identity: String,
}

pub fn ensure_identity(
    record: &Record,
    source: &mut dyn IdentitySource,
) -> (String, Option<IdentityAssignment>) {
    if record.has_identity() {
        return (record.identity.clone(), None);
    }
    let identity = source.next_identity();
    let staged = IdentityAssignment {
        collection: record.collection.clone(),
        position: record.position,
        identity: identity.clone(),
    };
    (identity, Some(staged))
}

pub fn write_batch(assignments: &[IdentityAssignment], identity_column: u32) -> Vec<ValueWrite> {
    assignments
        .iter()
        .map(|a| ValueWrite {
            range: CellRange::cell(&a.collection, a.position, identity_column),
            values: vec![vec![a.identity.clone()]],
        })
        .collect()
}

pub fn flush<S: TabularStore + ?Sized>(
    store: &S,
    assignments: &[IdentityAssignment],
    identity_column: u32,
) -> Result<usize, StoreError> {
    if assignments.is_empty() {
        return Ok(0);
    }
    store.write_values(&write_batch(assignments, identity_column))?;
    tracing::info!(count = assignments.len(), "identity write-back committed");
    Ok(assignments.len())
}

/// Deterministic identities for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct SequentialIdentitySource {
    pub next: u32,
}

#[cfg(test)]
impl IdentitySource for SequentialIdentitySource {
    fn next_identity(&mut self) -> String {
        self.next += 1;
        format!("id-{:06}", self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::collections::BTreeSet;

    #[test]
    fn clock_identities_are_unique_and_monotonic() {
        let mut source = ClockIdentitySource::default();
        let ids = (0..500).map(|_| source.next_identity()).collect::<Vec<_>>();
        let unique = ids.iter().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), ids.len());

        let millis = ids
            .iter()
            .map(|id| {
                let hex = id.split('-').nth(1).expect("millis part");
                i64::from_str_radix(hex, 16).expect("hex")
            })
            .collect::<Vec<_>>();
        assert!(millis.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn existing_identity_is_never_replaced() {
        let mut source = SequentialIdentitySource::default();
        let record = Record::new("A", 2, vec!["x".into(), "id-keep".into()], 2);
        let (identity, staged) = ensure_identity(&record, &mut source);
        assert_eq!(identity, "id-keep");
        assert!(staged.is_none());
        assert_eq!(source.next, 0);
    }

    #[test]
    fn flush_writes_all_assignments_in_one_batch() {
        let store = MemoryStore::from_rows(&[("A", vec![vec!["h"], vec!["a"], vec!["b"]])]);
        let mut source = SequentialIdentitySource::default();
        let staged = [2u32, 3]
            .iter()
            .map(|pos| {
                let record = Record::new("A", *pos, vec!["x".into()], 3);
                ensure_identity(&record, &mut source).1.expect("minted")
            })
            .collect::<Vec<_>>();

        assert_eq!(flush(&store, &staged, 3).expect("flush"), 2);
        assert_eq!(store.stats().value_writes, 1);
        let rows = store.rows("A");
        assert_eq!(rows[1], vec!["a", "", "id-000001"]);
        assert_eq!(rows[2], vec!["b", "", "id-000002"]);
    }
}
