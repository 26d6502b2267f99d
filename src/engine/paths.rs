use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub home: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<AppPaths> {
    let home = match env::var("ROWMIGRATE_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".rowmigrate"),
    };
    let logs_dir = env_or_default_path("ROWMIGRATE_LOGS_DIR", home.join("logs"));
    let state_dir = home.join("state");

    Ok(AppPaths {
        home,
        logs_dir,
        state_dir,
    })
}
