//! # tether-config
//!
//! Configuration for tether. Reads `tether.toml`, then lets environment
//! variables fill in secrets and override operational settings.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::TetherConfig;
pub use schema::{
    ConfigWarning, DiscordConfig, LoggingConfig, ServerConfig, SupervisorConfig, VoiceConfig,
    WarningSeverity,
};
