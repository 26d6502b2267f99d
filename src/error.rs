use crate::engine::pipeline::Stage;
use thiserror::Error;

/// Failure reported by a tabular-store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Rate limiting, 5xx, connection reset or timeout. Safe to retry.
    #[error("transient store failure during {op}: {message}")]
    Transient { op: String, message: String },
    /// Auth failure, malformed request, missing collection. Never retried.
    #[error("permanent store failure during {op}: {message}")]
    Permanent { op: String, message: String },
}

impl StoreError {
    pub fn transient(op: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(op: &str, message: impl Into<String>) -> Self {
        Self::Permanent {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transient { .. } => ErrorCode::E003StoreTransient,
            Self::Permanent { .. } => ErrorCode::E004StorePermanent,
        }
    }
}

/// A pipeline abort. Carries the stage that failed and the last one that
/// committed, so operators can tell how far the run got.
#[derive(Debug, Error)]
#[error(
    "{stage} stage failed (last completed stage: {}): {source}",
    stage_label(.last_completed)
)]
pub struct MigrationError {
    pub stage: Stage,
    pub last_completed: Option<Stage>,
    #[source]
    pub source: StoreError,
}

fn stage_label(stage: &Option<Stage>) -> &'static str {
    stage.map(Stage::as_str).unwrap_or("none")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003StoreTransient,
    E004StorePermanent,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003StoreTransient => "E003_STORE_TRANSIENT",
            Self::E004StorePermanent => "E004_STORE_PERMANENT",
        }
    }
}
