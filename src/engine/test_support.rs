use crate::engine::classify::{Rule, RuleKind};
use crate::engine::config::{MigrationConfig, MigrationSettings, StoreBackend, StoreConfig};
use crate::store::memory::MemoryStore;
use crate::store::retry::RetryPolicy;

pub const HEADER: [&str; 3] = ["Date", "Status", "Id"];

pub fn config() -> MigrationConfig {
    MigrationConfig {
        store: StoreConfig {
            backend: StoreBackend::File,
            spreadsheet_id: String::new(),
            workbook_path: Some("unused.json".into()),
        },
        migration: MigrationSettings {
            sources: vec!["Leads".into()],
            destinations: vec!["Interested".into(), "Meeting Set".into()],
            identity_column: 3,
            ..MigrationSettings::default()
        },
        retry: RetryPolicy::default(),
        rules: vec![
            Rule {
                destination: "Meeting Set".into(),
                kind: RuleKind::Contains,
                columns: vec![2],
                patterns: vec!["meeting set".into()],
                exclude: Vec::new(),
                exclude_columns: None,
            },
            Rule {
                destination: "Interested".into(),
                kind: RuleKind::Contains,
                columns: vec![2],
                patterns: vec!["interested".into()],
                exclude: vec!["not interested".into()],
                exclude_columns: None,
            },
        ],
    }
}

fn with_header(rows: Vec<Vec<&str>>) -> Vec<Vec<&str>> {
    let mut out = vec![HEADER.to_vec()];
    out.extend(rows);
    out
}

pub fn store_with(
    leads: Vec<Vec<&str>>,
    interested: Vec<Vec<&str>>,
    meeting_set: Vec<Vec<&str>>,
) -> MemoryStore {
    MemoryStore::from_rows(&[
        ("Leads", with_header(leads)),
        ("Interested", with_header(interested)),
        ("Meeting Set", with_header(meeting_set)),
    ])
}
