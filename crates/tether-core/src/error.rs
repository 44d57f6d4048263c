use thiserror::Error;

use crate::types::GuildId;

/// Unified error type for the tether workspace.
#[derive(Error, Debug)]
pub enum TetherError {
    // ── Voice presence errors ──────────────────────────────────
    #[error("invalid voice target: {0}")]
    Validation(String),

    #[error("missing voice permission: {0}")]
    Permission(String),

    #[error("voice connection for guild {guild_id} not ready after {secs}s")]
    Timeout { guild_id: GuildId, secs: u64 },

    #[error("voice transport error: {0}")]
    Transport(String),

    #[error("gave up reconnecting guild {guild_id} after {attempts} attempts")]
    ExhaustedRetries { guild_id: GuildId, attempts: u32 },

    #[error("join for guild {guild_id} was superseded")]
    JoinAborted { guild_id: GuildId },

    // ── Gateway errors ─────────────────────────────────────────
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("gateway session is not ready")]
    NotReady,

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TetherError {
    /// Stable label for structured log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            TetherError::Validation(_) => "validation",
            TetherError::Permission(_) => "permission",
            TetherError::Timeout { .. } => "timeout",
            TetherError::Transport(_) => "transport",
            TetherError::ExhaustedRetries { .. } => "exhausted_retries",
            TetherError::JoinAborted { .. } => "join_aborted",
            TetherError::Gateway(_) => "gateway",
            TetherError::NotReady => "not_ready",
            TetherError::Config(_) => "config",
            TetherError::ConfigValidation { .. } => "config_validation",
            TetherError::Io(_) => "io",
            TetherError::Serialization(_) => "serialization",
            TetherError::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
