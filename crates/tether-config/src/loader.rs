use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::TetherConfig;

/// Loads and reloads the tether configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<TetherConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TETHER_CONFIG env > ~/.tether/tether.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TETHER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tether")
            .join("tether.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> tether_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            TetherConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(tether_core::TetherError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> TetherConfig {
        self.config.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> tether_core::Result<TetherConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<TetherConfig>(&raw).map_err(|e| {
            tether_core::TetherError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    fn apply_env_overrides(config: TetherConfig) -> TetherConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (the process environment in production).
    ///
    /// Secrets fill in only when the file leaves them unset; operational knobs always win.
    pub fn apply_overrides(
        mut config: TetherConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> TetherConfig {
        if config.discord.token.is_none() {
            config.discord.token = lookup("DISCORD_BOT_TOKEN").filter(|t| !t.is_empty());
        }
        if config.discord.owner_id.is_none() {
            config.discord.owner_id = lookup("BOT_OWNER_ID").filter(|t| !t.is_empty());
        }
        if let Some(v) = lookup("TETHER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("TETHER_SERVER_LISTEN") {
            config.server.listen = v;
        } else if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            let host = config
                .server
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".into());
            config.server.listen = format!("{host}:{port}");
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> tether_core::Result<()> {
        if !self.config_path.exists() {
            return Err(tether_core::TetherError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config
            .validate()
            .map_err(tether_core::TetherError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}
