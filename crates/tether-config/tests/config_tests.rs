#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;
    use tether_config::ConfigLoader;
    use tether_config::schema::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_voice_config_defaults() {
        let config = VoiceConfig::default();
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_base_delay(), Duration::from_millis(3000));
        assert_eq!(config.join_timeout(), Duration::from_secs(30));
        assert_eq!(config.self_heal_window(), Duration::from_secs(5));
    }

    #[test]
    fn test_supervisor_config_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(30));
        assert_eq!(config.status_interval(), Duration::from_secs(60));
        assert_eq!(config.redial_delay(), Duration::from_secs(5));
        assert_eq!(config.retry_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_discord_config_defaults() {
        let config = DiscordConfig::default();
        assert_eq!(config.command_prefix, "!");
        assert!(config.self_deaf);
        assert!(!config.self_mute);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, "0.0.0.0:5000");
        assert!(config.enabled);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = TetherConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: TetherConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.voice.max_reconnect_attempts, 10);
        assert_eq!(restored.server.listen, config.server.listen);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let raw = r#"
[voice]
max_reconnect_attempts = 4
"#;
        let config: TetherConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.voice.max_reconnect_attempts, 4);
        assert_eq!(config.voice.reconnect_base_delay_ms, 3000);
        assert_eq!(config.supervisor.check_interval_secs, 30);
        assert_eq!(config.discord.command_prefix, "!");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_is_valid() {
        let warnings = TetherConfig::default().validate().unwrap();
        assert!(warnings.iter().all(|w| w.severity != WarningSeverity::Error));
        assert!(warnings.iter().any(|w| w.field == "discord.owner_id"));
    }

    #[test]
    fn test_zero_attempts_is_error() {
        let mut config = TetherConfig::default();
        config.voice.max_reconnect_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("voice.max_reconnect_attempts"));
    }

    #[test]
    fn test_zero_join_timeout_is_error() {
        let mut config = TetherConfig::default();
        config.voice.join_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_listen_only_matters_when_enabled() {
        let mut config = TetherConfig::default();
        config.server.listen = String::new();
        assert!(config.validate().is_err());
        config.server.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_log_format_is_warning() {
        let mut config = TetherConfig::default();
        config.logging.format = "yaml".into();
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "logging.format" && w.severity == WarningSeverity::Warning)
        );
    }

    #[test]
    fn test_warning_display_includes_hint() {
        let warning = ConfigWarning {
            field: "voice.join_timeout_secs".into(),
            message: "too small".into(),
            severity: WarningSeverity::Error,
            hint: Some("Set to e.g. 30".into()),
        };
        let text = warning.to_string();
        assert!(text.contains("voice.join_timeout_secs: too small"));
        assert!(text.contains("↳ Set to e.g. 30"));
    }

    // ── Env override tests ─────────────────────────────────────

    #[test]
    fn test_env_fills_token_and_owner() {
        let config = ConfigLoader::apply_overrides(
            TetherConfig::default(),
            env(&[("DISCORD_BOT_TOKEN", "abc"), ("BOT_OWNER_ID", "1234")]),
        );
        assert_eq!(config.discord.token.as_deref(), Some("abc"));
        assert_eq!(config.discord.owner_id.as_deref(), Some("1234"));
    }

    #[test]
    fn test_file_token_wins_over_env() {
        let mut base = TetherConfig::default();
        base.discord.token = Some("from-file".into());
        let config = ConfigLoader::apply_overrides(base, env(&[("DISCORD_BOT_TOKEN", "from-env")]));
        assert_eq!(config.discord.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_empty_env_token_is_ignored() {
        let config =
            ConfigLoader::apply_overrides(TetherConfig::default(), env(&[("DISCORD_BOT_TOKEN", "")]));
        assert!(config.discord.token.is_none());
    }

    #[test]
    fn test_port_env_rewrites_listen_port() {
        let config = ConfigLoader::apply_overrides(TetherConfig::default(), env(&[("PORT", "8080")]));
        assert_eq!(config.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_listen_env_beats_port_env() {
        let config = ConfigLoader::apply_overrides(
            TetherConfig::default(),
            env(&[("TETHER_SERVER_LISTEN", "127.0.0.1:9000"), ("PORT", "8080")]),
        );
        assert_eq!(config.server.listen, "127.0.0.1:9000");
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[discord]
token = "file-token"
command_prefix = "?"

[voice]
reconnect_base_delay_ms = 1000
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.discord.token.as_deref(), Some("file-token"));
        assert_eq!(config.discord.command_prefix, "?");
        assert_eq!(config.voice.reconnect_base_delay_ms, 1000);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[voice]\nmax_reconnect_attempts = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[voice\n").unwrap();
        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().voice.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[voice]\nmax_reconnect_attempts = 3\n").unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().voice.max_reconnect_attempts, 3);

        std::fs::write(&config_path, "[voice]\nmax_reconnect_attempts = 7\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().voice.max_reconnect_attempts, 7);

        std::fs::write(&config_path, "[voice]\nmax_reconnect_attempts = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().voice.max_reconnect_attempts, 7);
    }
}
