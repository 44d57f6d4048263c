use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tether_config::TetherConfig;
use tether_runtime::{PresenceRuntime, wait_for_shutdown_signal};
use tether_server::AppState;

pub(super) async fn cmd_start(config: TetherConfig, no_server: bool) -> tether_core::Result<()> {
    println!("🎧 tether v{}", env!("CARGO_PKG_VERSION"));
    println!("   Command prefix: {}", config.discord.command_prefix);
    println!(
        "   Reconnect: {} attempts, {}ms base delay",
        config.voice.max_reconnect_attempts, config.voice.reconnect_base_delay_ms
    );
    println!();

    if config.discord.token.is_none() {
        eprintln!("❌ DISCORD_BOT_TOKEN environment variable is not set");
        eprintln!("   In tether.toml:  [discord]");
        eprintln!("                    token = \"...\"");
        eprintln!("   Or env var:      export DISCORD_BOT_TOKEN=...");
        eprintln!();
    }
    let runtime = PresenceRuntime::new(config.clone())?;

    if !no_server && config.server.enabled {
        let listen = config.server.listen.clone();
        let state = Arc::new(AppState {
            status: runtime.status_source(),
            controller: runtime.controller().clone(),
        });
        tokio::spawn(async move {
            if let Err(e) = tether_server::start_server(&listen, state).await {
                error!(error = %e, "failed to start keep-alive server");
            }
        });
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_shutdown_signal().await {
                Ok(signal) => {
                    info!(signal, "received shutdown signal");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
            }
        }
    });

    // Blocks until shutdown
    runtime.run(shutdown).await
}
