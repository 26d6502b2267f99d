use std::env;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn resolve_filter() -> EnvFilter {
    if let Ok(raw) = env::var("ROWMIGRATE_LOG") {
        let trimmed = raw.trim();
        if !trimmed.is_empty()
            && let Ok(filter) = EnvFilter::try_new(trimmed)
        {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the stderr subscriber. Stdout is reserved for command reports.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(resolve_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
