use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration, maps to `tether.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub discord: DiscordConfig,
    pub voice: VoiceConfig,
    pub supervisor: SupervisorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Discord ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. Falls back to `DISCORD_BOT_TOKEN`.
    pub token: Option<String>,
    /// User allowed to run owner-only commands. Falls back to `BOT_OWNER_ID`.
    pub owner_id: Option<String>,
    /// Text command prefix.
    pub command_prefix: String,
    pub self_deaf: bool,
    pub self_mute: bool,
    /// Activity shown on the bot's profile.
    pub activity: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner_id: None,
            command_prefix: "!".into(),
            self_deaf: true,
            self_mute: false,
            activity: "Maintaining voice presence 24/7".into(),
        }
    }
}

// ── Voice ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Consecutive automatic reconnects before giving up.
    pub max_reconnect_attempts: u32,
    /// Backoff base; attempt `n` waits `base * 2^n`.
    pub reconnect_base_delay_ms: u64,
    /// How long a join may take to reach Ready.
    pub join_timeout_secs: u64,
    /// How long a dropped session gets to recover on its own.
    pub self_heal_window_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_base_delay_ms: 3000,
            join_timeout_secs: 30,
            self_heal_window_secs: 5,
        }
    }
}

impl VoiceConfig {
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn self_heal_window(&self) -> Duration {
        Duration::from_secs(self.self_heal_window_secs)
    }
}

// ── Supervisor ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Gateway liveness check period.
    pub check_interval_secs: u64,
    /// Status log period.
    pub status_interval_secs: u64,
    /// Grace period before a re-login once the session looks lost.
    pub redial_delay_secs: u64,
    /// Wait after a failed re-login before trying again.
    pub retry_delay_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            status_interval_secs: 60,
            redial_delay_secs: 5,
            retry_delay_secs: 30,
        }
    }
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn redial_delay(&self) -> Duration {
        Duration::from_secs(self.redial_delay_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve the liveness endpoints.
    pub enabled: bool,
    /// HTTP listen address.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:5000".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl TetherConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Reconnect budget ───
        if self.voice.max_reconnect_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "voice.max_reconnect_attempts".into(),
                message: "attempt budget is 0, dropped connections would never be retried".into(),
                severity: WarningSeverity::Error,
                hint: Some("The default is 10".into()),
            });
        } else if self.voice.max_reconnect_attempts > 20 {
            warnings.push(ConfigWarning {
                field: "voice.max_reconnect_attempts".into(),
                message: format!(
                    "{} attempts with exponential backoff reaches delays of years",
                    self.voice.max_reconnect_attempts
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Delays double every attempt; 10 already spans ~50 minutes".into()),
            });
        }

        // ── Backoff base ───
        if self.voice.reconnect_base_delay_ms == 0 {
            warnings.push(ConfigWarning {
                field: "voice.reconnect_base_delay_ms".into(),
                message: "base delay is 0, every retry would fire immediately".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3000".into()),
            });
        }

        // ── Timeouts ───
        if self.voice.join_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "voice.join_timeout_secs".into(),
                message: "join timeout is 0, no join could ever succeed".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.voice.self_heal_window_secs >= self.voice.join_timeout_secs
            && self.voice.join_timeout_secs > 0
        {
            warnings.push(ConfigWarning {
                field: "voice.self_heal_window_secs".into(),
                message: "self-heal window is not shorter than the join timeout".into(),
                severity: WarningSeverity::Info,
                hint: Some("A short window (5s) turns real losses into retries quickly".into()),
            });
        }

        // ── Supervisor intervals ───
        if self.supervisor.check_interval_secs == 0 || self.supervisor.status_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "supervisor".into(),
                message: "supervisor intervals must be greater than 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Defaults are check_interval_secs = 30, status_interval_secs = 60".into()),
            });
        }

        // ── Server listen address ───
        if self.server.enabled && self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '0.0.0.0:5000'".into()),
            });
        }

        // ── Owner id ───
        if self.discord.owner_id.is_none() {
            warnings.push(ConfigWarning {
                field: "discord.owner_id".into(),
                message: "no owner configured, the connections command is open to everyone".into(),
                severity: WarningSeverity::Info,
                hint: Some("Set discord.owner_id or BOT_OWNER_ID".into()),
            });
        }

        // ── Command prefix ───
        if self.discord.command_prefix.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "discord.command_prefix".into(),
                message: "command prefix is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("The default is '!'".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
