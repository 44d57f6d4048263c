use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tether_config::{ConfigLoader, TetherConfig};
use tether_core::{Result, TetherError};

mod start;

/// 🎧 tether: keeps a Discord bot present in voice channels around the clock
#[derive(Parser)]
#[command(name = "tether", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tether.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Log in to Discord and maintain voice presence (plus the liveness server)
    Start {
        /// Don't start the liveness HTTP server
        #[arg(long)]
        no_server: bool,
    },
    /// Query a running agent's liveness server
    Status,
    /// Show version and build info
    Version,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let _ = dotenvy::dotenv();

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Start { no_server } => start::cmd_start(config, no_server).await,
            Commands::Status => Self::cmd_status(config).await,
            Commands::Version => Self::cmd_version(),
            Commands::Config { json } => Self::cmd_config(config, json),
        }
    }

    async fn cmd_status(config: TetherConfig) -> Result<()> {
        let listen = &config.server.listen;
        println!("Checking status at http://{listen}...");

        let client = reqwest::Client::builder()
            .tcp_keepalive(None)
            .build()
            .unwrap_or_default();
        match client.get(format!("http://{listen}/status")).send().await {
            Ok(resp) => {
                let data: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| TetherError::Other(e.into()))?;
                let pretty = serde_json::to_string_pretty(&data)
                    .map_err(|e| TetherError::Other(e.into()))?;
                println!("{pretty}");
            }
            Err(_) => {
                println!("❌ Agent is not running at {listen}");
            }
        }
        Ok(())
    }

    fn cmd_config(mut config: TetherConfig, json: bool) -> Result<()> {
        if config.discord.token.is_some() {
            config.discord.token = Some("********".into());
        }
        let rendered = if json {
            serde_json::to_string_pretty(&config).map_err(|e| TetherError::Other(e.into()))?
        } else {
            toml::to_string_pretty(&config).map_err(|e| TetherError::Other(e.into()))?
        };
        println!("{rendered}");
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("🎧 tether v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// `RUST_LOG` wins over the resolved level when set.
fn init_tracing(format: &str, level: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .init(),
    }
}
