use crate::engine::classify::{Rule, RuleKind};
use crate::store::retry::RetryPolicy;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sheets,
    File,
}

impl StoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sheets => "sheets",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub spreadsheet_id: String,
    pub workbook_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    #[default]
    Move,
    CopyOnly,
}

impl MigrationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::CopyOnly => "copy-only",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "move" => Some(Self::Move),
            "copy-only" | "copy_only" | "copy" => Some(Self::CopyOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
    pub identity_column: u32,
    pub header_rows: u32,
    pub mode: MigrationMode,
    pub require_destination_identity: bool,
    pub require_unchanged_checksum: bool,
    pub create_missing_destinations: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destinations: Vec::new(),
            identity_column: 0,
            header_rows: 1,
            mode: MigrationMode::Move,
            require_destination_identity: true,
            require_unchanged_checksum: true,
            create_missing_destinations: true,
        }
    }
}

/// Built once at startup and passed by reference into the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub store: StoreConfig,
    pub migration: MigrationSettings,
    pub retry: RetryPolicy,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartialMigrationConfig {
    store: Option<StoreConfig>,
    migration: Option<MigrationSettings>,
    retry: Option<RetryPolicy>,
    #[serde(default)]
    rules: Vec<Rule>,
}

fn parse_u32(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok()
}

fn parse_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Option<Vec<String>> {
    let out = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if out.is_empty() { None } else { Some(out) }
}

pub fn parse_config(raw: &str) -> Result<MigrationConfig> {
    let parsed: PartialMigrationConfig = toml::from_str(raw)?;
    Ok(MigrationConfig {
        store: parsed.store.unwrap_or_default(),
        migration: parsed.migration.unwrap_or_default(),
        retry: parsed.retry.unwrap_or_default(),
        rules: parsed.rules,
    })
}

/// Overlay `ROWMIGRATE_*` values. `lookup` returns trimmed, non-empty values only.
pub fn apply_env_overrides(cfg: &mut MigrationConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ROWMIGRATE_STORE_BACKEND") {
        match v.to_ascii_lowercase().as_str() {
            "sheets" => cfg.store.backend = StoreBackend::Sheets,
            "file" => cfg.store.backend = StoreBackend::File,
            _ => {}
        }
    }
    if let Some(v) = lookup("ROWMIGRATE_SPREADSHEET_ID") {
        cfg.store.spreadsheet_id = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_WORKBOOK_PATH") {
        cfg.store.workbook_path = Some(PathBuf::from(v));
    }

    let m = &mut cfg.migration;
    if let Some(v) = lookup("ROWMIGRATE_SOURCES").as_deref().and_then(parse_csv) {
        m.sources = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_DESTINATIONS").as_deref().and_then(parse_csv) {
        m.destinations = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_IDENTITY_COLUMN").as_deref().and_then(parse_u32) {
        m.identity_column = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_HEADER_ROWS").as_deref().and_then(parse_u32) {
        m.header_rows = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_MODE").as_deref().and_then(MigrationMode::parse) {
        m.mode = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_REQUIRE_DESTINATION_IDENTITY")
        .as_deref()
        .and_then(parse_bool)
    {
        m.require_destination_identity = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_REQUIRE_UNCHANGED_CHECKSUM")
        .as_deref()
        .and_then(parse_bool)
    {
        m.require_unchanged_checksum = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_CREATE_MISSING_DESTINATIONS")
        .as_deref()
        .and_then(parse_bool)
    {
        m.create_missing_destinations = v;
    }

    let r = &mut cfg.retry;
    if let Some(v) = lookup("ROWMIGRATE_RETRY_MAX_ATTEMPTS").as_deref().and_then(parse_u32) {
        r.max_attempts = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_RETRY_BASE_DELAY_MS").as_deref().and_then(parse_u64) {
        r.base_delay_ms = v;
    }
    if let Some(v) = lookup("ROWMIGRATE_RETRY_MAX_DELAY_MS").as_deref().and_then(parse_u64) {
        r.max_delay_ms = v;
    }
}

fn validate_rule(idx: usize, rule: &Rule, destinations: &BTreeSet<&str>) -> Result<()> {
    let label = format!("rule #{} ({})", idx + 1, rule.destination);
    if !destinations.contains(rule.destination.as_str()) {
        return Err(anyhow!("invalid {label}: destination is not a declared destination"));
    }
    if rule.columns.is_empty() || rule.columns.contains(&0) {
        return Err(anyhow!("invalid {label}: columns must be non-empty and 1-based"));
    }
    if rule
        .exclude_columns
        .as_ref()
        .is_some_and(|cols| cols.is_empty() || cols.contains(&0))
    {
        return Err(anyhow!("invalid {label}: exclude_columns must be non-empty and 1-based"));
    }
    if rule.exclude.iter().any(|p| p.trim().is_empty()) {
        return Err(anyhow!("invalid {label}: exclude phrases cannot be empty"));
    }
    match rule.kind {
        RuleKind::Contains => {
            if rule.patterns.is_empty() || rule.patterns.iter().any(|p| p.trim().is_empty()) {
                return Err(anyhow!("invalid {label}: contains rules need non-empty patterns"));
            }
        }
        RuleKind::Flag => {
            if rule.columns.len() != 1 {
                return Err(anyhow!("invalid {label}: flag rules take exactly one column"));
            }
            if !rule.patterns.is_empty() {
                return Err(anyhow!("invalid {label}: flag rules take no patterns"));
            }
        }
    }
    Ok(())
}

pub fn validate(cfg: &MigrationConfig) -> Result<()> {
    let m = &cfg.migration;
    match cfg.store.backend {
        StoreBackend::Sheets if cfg.store.spreadsheet_id.trim().is_empty() => {
            return Err(anyhow!("invalid store: sheets backend requires spreadsheet_id"));
        }
        StoreBackend::File if cfg.store.workbook_path.is_none() => {
            return Err(anyhow!("invalid store: file backend requires workbook_path"));
        }
        _ => {}
    }
    if m.sources.is_empty() {
        return Err(anyhow!("invalid migration: at least one source collection is required"));
    }
    if m.destinations.is_empty() {
        return Err(anyhow!("invalid migration: at least one destination collection is required"));
    }
    if m.identity_column == 0 {
        return Err(anyhow!("invalid migration: identity_column must be >= 1"));
    }

    let sources = m.sources.iter().map(String::as_str).collect::<BTreeSet<_>>();
    let destinations = m.destinations.iter().map(String::as_str).collect::<BTreeSet<_>>();
    if sources.len() != m.sources.len() || destinations.len() != m.destinations.len() {
        return Err(anyhow!("invalid migration: collection names must be unique"));
    }
    if let Some(overlap) = sources.intersection(&destinations).next() {
        return Err(anyhow!(
            "invalid migration: {overlap} cannot be both a source and a destination"
        ));
    }

    if cfg.rules.is_empty() {
        return Err(anyhow!("invalid rules: at least one [[rules]] entry is required"));
    }
    for (idx, rule) in cfg.rules.iter().enumerate() {
        validate_rule(idx, rule, &destinations)?;
    }

    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("invalid retry: max_attempts must be >= 1"));
    }
    if cfg.retry.max_delay_ms < cfg.retry.base_delay_ms {
        return Err(anyhow!("invalid retry: max_delay_ms must be >= base_delay_ms"));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("ROWMIGRATE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".rowmigrate").join("rowmigrate.toml"))
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

pub fn load_config() -> Result<MigrationConfig> {
    let mut cfg = MigrationConfig::default();
    if let Some(path) = resolve_config_path()
        && path.exists()
    {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        cfg = parse_config(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
    }
    apply_env_overrides(&mut cfg, env_non_empty);
    validate(&cfg)?;
    Ok(cfg)
}
