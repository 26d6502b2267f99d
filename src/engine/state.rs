use crate::engine::paths::AppPaths;
use crate::engine::pipeline::RunCounts;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub schema_version: u32,
    pub last_run_id: Option<String>,
    pub last_started_epoch_secs: Option<u64>,
    pub last_finished_epoch_secs: Option<u64>,
    pub last_status: Option<String>,
    pub last_completed_stage: Option<String>,
    pub last_counts: Option<RunCounts>,
    pub last_error: Option<String>,
    pub total_runs: u64,
    pub total_copied: u64,
    pub total_deleted: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_run_id: None,
            last_started_epoch_secs: None,
            last_finished_epoch_secs: None,
            last_status: None,
            last_completed_stage: None,
            last_counts: None,
            last_error: None,
            total_runs: 0,
            total_copied: 0,
            total_deleted: 0,
        }
    }
}

pub fn state_file_path(paths: &AppPaths) -> PathBuf {
    paths.state_dir.join("rowmigrate_state.json")
}

pub fn load(paths: &AppPaths) -> Result<RunState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(RunState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: RunState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &AppPaths, state: &RunState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}
