use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tether_config::TetherConfig;
use tether_core::{
    ChannelId, Event, EventBus, GuildId, ProcessStatus, Result, StatusSource, TetherError,
    resident_memory_bytes,
};
use tether_discord::{
    DirectoryCache, DiscordGateway, DiscordVoiceTransport, GatewayEvent, IncomingMessage,
    MessagePayload, RestClient,
};
use tether_voice::{
    ControllerSettings, GatewaySession, SessionSupervisor, SupervisorSettings, VoiceController,
    spawn_guarded,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{self, CommandContext};

/// Status of the whole process, for the supervisor's status line and the HTTP surface.
pub struct RuntimeStatus {
    gateway: Arc<dyn GatewaySession>,
    cache: Arc<DirectoryCache>,
    controller: Arc<VoiceController>,
    started: Instant,
}

impl RuntimeStatus {
    pub fn new(
        gateway: Arc<dyn GatewaySession>,
        cache: Arc<DirectoryCache>,
        controller: Arc<VoiceController>,
    ) -> Self {
        Self {
            gateway,
            cache,
            controller,
            started: Instant::now(),
        }
    }
}

impl StatusSource for RuntimeStatus {
    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            bot_ready: self.gateway.is_ready(),
            guilds: self.cache.guild_count(),
            voice_connections: self.controller.connection_count(),
            uptime_secs: self.started.elapsed().as_secs(),
            memory_bytes: resident_memory_bytes(),
        }
    }
}

/// Translate a voice state update for the agent's own user into controller calls.
pub fn apply_own_voice_state(
    controller: &Arc<VoiceController>,
    guild_id: &GuildId,
    channel_id: Option<&ChannelId>,
    previous: Option<&ChannelId>,
) {
    match (channel_id, previous) {
        (None, Some(_)) => controller.on_forced_disconnect(guild_id),
        (Some(channel), previous) if previous != Some(channel) => {
            controller.on_agent_moved(guild_id, channel);
        }
        _ => {}
    }
}

/// Message posted when a guild's reconnect budget runs out.
pub fn exhaustion_notice(prefix: &str, channel_id: &ChannelId, attempts: u32) -> String {
    format!(
        "❌ Lost voice connection to <#{channel_id}> and gave up after {attempts} reconnection attempts. Use `{prefix}join` to bring me back."
    )
}

/// Wires the Discord collaborators into the voice controller and session supervisor.
pub struct PresenceRuntime {
    config: TetherConfig,
    controller: Arc<VoiceController>,
    supervisor: Arc<SessionSupervisor>,
    gateway: Arc<DiscordGateway>,
    transport: Arc<DiscordVoiceTransport>,
    cache: Arc<DirectoryCache>,
    rest: Arc<RestClient>,
    events: EventBus,
    status: Arc<RuntimeStatus>,
    gateway_events: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
    /// Text channel that last asked for presence in each guild.
    notice_channels: Mutex<HashMap<GuildId, ChannelId>>,
}

impl PresenceRuntime {
    pub fn new(config: TetherConfig) -> Result<Arc<Self>> {
        let token = config
            .discord
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                TetherError::Config("DISCORD_BOT_TOKEN environment variable is not set".into())
            })?;

        let events = EventBus::default();
        let rest = Arc::new(RestClient::new(token.clone()));
        let cache = Arc::new(DirectoryCache::with_rest(rest.clone()));
        let (gateway, gateway_events) =
            DiscordGateway::new(token, config.discord.activity.clone(), cache.clone());
        let gateway = Arc::new(gateway);
        let transport = Arc::new(DiscordVoiceTransport::new(gateway.sender(), cache.clone()));

        let controller = VoiceController::new(
            ControllerSettings::from_config(&config),
            transport.clone(),
            cache.clone(),
            events.clone(),
        );
        let status = Arc::new(RuntimeStatus::new(
            gateway.clone(),
            cache.clone(),
            controller.clone(),
        ));
        let supervisor = Arc::new(
            SessionSupervisor::new(
                gateway.clone(),
                SupervisorSettings::from_config(&config),
                events.clone(),
            )
            .with_status(status.clone()),
        );

        Ok(Arc::new(Self {
            config,
            controller,
            supervisor,
            gateway,
            transport,
            cache,
            rest,
            events,
            status,
            gateway_events: Mutex::new(Some(gateway_events)),
            notice_channels: Mutex::new(HashMap::new()),
        }))
    }

    pub fn controller(&self) -> &Arc<VoiceController> {
        &self.controller
    }

    pub fn status_source(&self) -> Arc<dyn StatusSource> {
        self.status.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Log in, then serve until `shutdown` fires. A failed first login is fatal.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut gateway_events = self
            .gateway_events
            .lock()
            .take()
            .ok_or_else(|| TetherError::Other(anyhow::anyhow!("runtime is already running")))?;
        let mut presence_events = self.events.subscribe();

        info!("logging in to Discord");
        if let Err(e) = self.gateway.login().await {
            error!(error = %e, "failed to login to Discord");
            return Err(e);
        }

        let supervisor = self.supervisor.clone();
        let supervisor_stop = shutdown.child_token();
        spawn_guarded("session-supervisor", async move {
            supervisor.run(supervisor_stop).await;
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = gateway_events.recv() => self.on_gateway_event(event),
                event = presence_events.recv() => match event {
                    Ok(event) => self.on_presence_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "presence event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("gracefully shutting down");
        self.controller.disconnect_all();
        if let Err(e) = self.gateway.destroy().await {
            warn!(error = %e, "error while closing gateway session");
        }
        self.events.publish(Event::Shutdown);
        info!("shutdown complete");
    }

    fn on_gateway_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Ready {
                user_id,
                guild_count,
            } => {
                info!(bot_id = %user_id, guilds = guild_count, "bot logged in");
                info!(
                    "ready to receive voice commands. Use {}join to connect to voice channels.",
                    self.config.discord.command_prefix
                );
            }
            GatewayEvent::Message(message) => self.on_message(message),
            GatewayEvent::VoiceStateUpdate {
                guild_id,
                user_id,
                channel_id,
                session_id,
                previous,
            } => {
                self.transport.handle_voice_state(
                    &guild_id,
                    &user_id,
                    channel_id.as_deref(),
                    &session_id,
                );
                if self.cache.bot_user_id().as_deref() == Some(user_id.as_str()) {
                    apply_own_voice_state(
                        &self.controller,
                        &guild_id,
                        channel_id.as_ref(),
                        previous.as_ref(),
                    );
                }
            }
            GatewayEvent::VoiceServerUpdate {
                guild_id,
                token,
                endpoint,
            } => self
                .transport
                .handle_voice_server(&guild_id, &token, endpoint.as_deref()),
            GatewayEvent::SessionLost { reason } => {
                warn!(reason = %reason, "bot disconnected from Discord");
                self.supervisor.notify_session_lost();
            }
        }
    }

    fn on_message(self: &Arc<Self>, message: IncomingMessage) {
        let Some(command) = commands::parse(&self.config.discord.command_prefix, &message) else {
            return;
        };
        if command.is_join()
            && let Some(guild_id) = &message.guild_id
        {
            self.notice_channels
                .lock()
                .insert(guild_id.clone(), message.channel_id.clone());
        }

        let runtime = Arc::clone(self);
        spawn_guarded("command", async move {
            let context = runtime.command_context();
            let Some(reply) = context.execute(&command, &message).await else {
                return;
            };
            let payload = reply.into_payload().reply_to(message.id.clone());
            if let Err(e) = runtime.rest.send_message(&message.channel_id, &payload).await {
                error!(command = command.name(), error = %e, "failed to send command reply");
            }
        });
    }

    fn command_context(&self) -> CommandContext {
        CommandContext {
            controller: self.controller.clone(),
            cache: self.cache.clone(),
            owner_id: self.config.discord.owner_id.clone(),
            prefix: self.config.discord.command_prefix.clone(),
        }
    }

    fn on_presence_event(self: &Arc<Self>, event: Event) {
        let Event::RetriesExhausted {
            guild_id,
            channel_id,
            attempts,
        } = event
        else {
            debug!(?event, "presence event");
            return;
        };
        let Some(notice_channel) = self.notice_channels.lock().get(&guild_id).cloned() else {
            return;
        };

        let text = exhaustion_notice(&self.config.discord.command_prefix, &channel_id, attempts);
        let rest = self.rest.clone();
        spawn_guarded("exhaustion-notice", async move {
            if let Err(e) = rest
                .send_message(&notice_channel, &MessagePayload::text(text))
                .await
            {
                error!(guild = %guild_id, error = %e, "failed to post exhaustion notice");
            }
        });
    }
}
