use anyhow::Result;

use crate::commands::CommandReport;
use crate::commands::migrate::{self, MigrateOptions};

pub fn run() -> Result<CommandReport> {
    let opts = MigrateOptions {
        dry_run: true,
        copy_only: false,
    };
    let (mut report, outcome) = migrate::execute("plan", &opts)?;
    let Some(outcome) = outcome else {
        return Ok(report);
    };

    for item in &outcome.items {
        let destination = match item.destination_position {
            Some(row) => format!("{}:{row}", item.destination_collection),
            None => format!("{}:present", item.destination_collection),
        };
        report.detail(format!(
            "item source={}:{} identity={} destination={} checksum={}",
            item.source_collection,
            item.source_position,
            item.identity,
            destination,
            item.checksum_snapshot
        ));
    }
    Ok(report)
}
