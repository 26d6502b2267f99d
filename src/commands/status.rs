use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::engine::config::{load_config, resolve_config_path};
use crate::engine::lock::lock_path;
use crate::engine::paths::resolve_paths;
use crate::engine::state::{self, state_file_path};
use crate::error::ErrorCode;
use crate::store::open_store;

include!(concat!(env!("OUT_DIR"), "/rowmigrate_env_allowlist.rs"));

/// `ROWMIGRATE_*` names present in the environment that no code reads.
pub fn unknown_env_vars<I>(names: I, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown = names
        .into_iter()
        .filter(|name| name.starts_with("ROWMIGRATE_"))
        .filter(|name| !allowlist.contains(&name.as_str()))
        .collect::<Vec<_>>();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    report.detail(format!("build_id={}", env!("BUILD_ID")));

    let paths = resolve_paths()?;
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("state_file={}", state_file_path(&paths).display()));
    report.detail(format!("lock_file={}", lock_path(&paths).display()));

    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config={}", path.display())),
        Some(path) => report.detail(format!("config={} (missing, env only)", path.display())),
        None => report.detail("config=unresolved (env only)"),
    }

    let names = env::vars_os().filter_map(|(k, _)| k.into_string().ok());
    for name in unknown_env_vars(names, GENERATED_ENV_ALLOWLIST) {
        report.issue(format!("unrecognised environment variable {name}"));
    }

    match state::load(&paths) {
        Ok(last) => {
            report.detail(format!("total_runs={}", last.total_runs));
            report.detail(format!("total_copied={}", last.total_copied));
            report.detail(format!("total_deleted={}", last.total_deleted));
            if let Some(run_id) = &last.last_run_id {
                report.detail(format!("last_run.id={run_id}"));
                report.detail(format!(
                    "last_run.status={}",
                    last.last_status.as_deref().unwrap_or("unknown")
                ));
                report.detail(format!(
                    "last_run.completed_stage={}",
                    last.last_completed_stage.as_deref().unwrap_or("none")
                ));
            }
            if let Some(err) = &last.last_error {
                report.detail(format!("last_run.error={err}"));
            }
        }
        Err(err) => report.issue(format!("state unreadable: {err:#}")),
    }

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("{}: {err:#}", ErrorCode::E002ConfigInvalid.as_str()));
            return Ok(report);
        }
    };
    let settings = &cfg.migration;
    report.detail(format!("store.backend={}", cfg.store.backend.as_str()));
    report.detail(format!("migration.sources={}", settings.sources.join(",")));
    report.detail(format!(
        "migration.destinations={}",
        settings.destinations.join(",")
    ));
    report.detail(format!("migration.identity_column={}", settings.identity_column));
    report.detail(format!("migration.header_rows={}", settings.header_rows));
    report.detail(format!("migration.mode={}", settings.mode.as_str()));
    report.detail(format!("rules={}", cfg.rules.len()));

    let collections = open_store(&cfg.store).and_then(|store| Ok(store.collections()?));
    match collections {
        Ok(metas) => {
            for meta in metas {
                report.detail(format!(
                    "collection={} rows={} columns={}",
                    meta.name, meta.row_count, meta.column_count
                ));
            }
        }
        Err(err) => report.issue(format!("store unreachable: {err:#}")),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_env_vars_ignores_other_prefixes_and_known_names() {
        // Typos are assembled at runtime so the build scan does not allowlist them.
        let prefix = "ROWMIGRATE_";
        let names = vec![
            "PATH".to_string(),
            "ROWMIGRATE_HOME".to_string(),
            format!("{prefix}HEADER_ROW"),
            format!("{prefix}CONFG_PATH"),
        ];
        let unknown = unknown_env_vars(names, &["ROWMIGRATE_HOME", "ROWMIGRATE_HEADER_ROWS"]);
        assert_eq!(
            unknown,
            vec![format!("{prefix}CONFG_PATH"), format!("{prefix}HEADER_ROW")]
        );
    }

    #[test]
    fn generated_allowlist_covers_config_overrides() {
        for key in ["ROWMIGRATE_HOME", "ROWMIGRATE_CONFIG_PATH", "ROWMIGRATE_IDENTITY_COLUMN"] {
            assert!(GENERATED_ENV_ALLOWLIST.contains(&key), "{key} missing");
        }
    }
}
