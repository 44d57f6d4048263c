//! Text command surface: parse, execute, reply.

use chrono::Utc;
use std::sync::Arc;
use tether_core::{GuildId, VoiceState};
use tether_discord::rest::{COLOR_BLUE, COLOR_GREEN, COLOR_YELLOW};
use tether_discord::{DirectoryCache, Embed, IncomingMessage, MessagePayload};
use tether_voice::{GuildDirectory, VoiceController};
use tracing::{error, info};

use crate::format::{format_uptime, truncate_field};

const COLOR_ORANGE: u32 = 0xff9900;
const DETAILS_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    JoinId(Option<String>),
    Leave,
    Status,
    Health,
    Connections,
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::JoinId(_) => "joinid",
            Command::Leave => "leave",
            Command::Status => "status",
            Command::Health => "health",
            Command::Connections => "connections",
            Command::Help => "help",
        }
    }

    /// Whether the command asks for presence in a channel.
    pub fn is_join(&self) -> bool {
        matches!(self, Command::Join | Command::JoinId(_))
    }
}

/// Parse a message into a command. Bots, other prefixes and unknown verbs yield `None`.
pub fn parse(prefix: &str, message: &IncomingMessage) -> Option<Command> {
    if message.author_bot {
        return None;
    }
    let rest = message.content.strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let verb = words.next()?.to_lowercase();
    match verb.as_str() {
        "join" => Some(Command::Join),
        "joinid" => Some(Command::JoinId(words.next().map(str::to_string))),
        "leave" => Some(Command::Leave),
        "status" => Some(Command::Status),
        "health" => Some(Command::Health),
        "connections" => Some(Command::Connections),
        "help" => Some(Command::Help),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Embed(Embed),
}

impl Reply {
    pub fn into_payload(self) -> MessagePayload {
        match self {
            Reply::Text(text) => MessagePayload::text(text),
            Reply::Embed(embed) => MessagePayload::embed(embed),
        }
    }

    /// The text of a plain reply, if it is one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            Reply::Embed(_) => None,
        }
    }
}

fn text(s: impl Into<String>) -> Reply {
    Reply::Text(s.into())
}

/// What a command needs to run.
pub struct CommandContext {
    pub controller: Arc<VoiceController>,
    pub cache: Arc<DirectoryCache>,
    pub owner_id: Option<String>,
    pub prefix: String,
}

impl CommandContext {
    /// Run a command for a guild message. Direct messages get no reply.
    pub async fn execute(&self, command: &Command, message: &IncomingMessage) -> Option<Reply> {
        let guild_id = message.guild_id.as_ref()?;
        info!(command = command.name(), guild = %guild_id, user = %message.author_name, "command received");
        let reply = match command {
            Command::Join => self.join(guild_id, message).await,
            Command::JoinId(channel) => self.join_id(guild_id, channel.as_deref()).await,
            Command::Leave => self.leave(guild_id).await,
            Command::Status => self.status(guild_id).await,
            Command::Health => self.health(),
            Command::Connections => self.connections(message),
            Command::Help => self.help(),
        };
        Some(reply)
    }

    async fn join(&self, guild_id: &GuildId, message: &IncomingMessage) -> Reply {
        let Some(channel_id) = self.cache.voice_channel_of(guild_id, &message.author_id) else {
            return text("❌ You need to be in a voice channel first!");
        };
        let name = self
            .cache
            .channel_info(&channel_id)
            .map(|c| c.name)
            .unwrap_or_else(|| channel_id.clone());
        self.join_and_reply(guild_id, &channel_id, &name).await
    }

    async fn join_id(&self, guild_id: &GuildId, channel_id: Option<&str>) -> Reply {
        let Some(channel_id) = channel_id else {
            return text(format!(
                "❌ Please provide a voice channel ID! Usage: `{}joinid <channel_id>`",
                self.prefix
            ));
        };
        let channel_id = channel_id.to_string();
        let channel = match self.controller.directory().resolve_channel(&channel_id).await {
            Ok(channel) if channel.kind.is_voice() => channel,
            _ => return text("❌ Invalid voice channel ID!"),
        };
        if channel.guild_id.as_ref() != Some(guild_id) {
            return text("❌ Channel must be in this server!");
        }
        self.join_and_reply(guild_id, &channel_id, &channel.name).await
    }

    async fn join_and_reply(&self, guild_id: &GuildId, channel_id: &String, name: &str) -> Reply {
        match self.controller.join(guild_id, channel_id).await {
            Ok(_) => text(format!(
                "✅ Successfully joined **{name}**! I'll maintain presence here 24/7."
            )),
            Err(e) => {
                error!(guild = %guild_id, channel = %channel_id, error = %e, kind = e.as_label(), "join command failed");
                text(format!("❌ Failed to join voice channel: {e}"))
            }
        }
    }

    async fn leave(&self, guild_id: &GuildId) -> Reply {
        if self.controller.leave(guild_id).await {
            text("✅ Left the voice channel successfully!")
        } else {
            text("❌ I'm not connected to any voice channel in this server!")
        }
    }

    async fn status(&self, guild_id: &GuildId) -> Reply {
        let Some(info) = self.controller.connection_info(guild_id) else {
            return text("❌ Not connected to any voice channel in this server!");
        };
        let channel_name = self
            .controller
            .directory()
            .resolve_channel(&info.channel_id)
            .await
            .map(|c| c.name)
            .unwrap_or_else(|_| "Unknown".to_string());
        let now = Utc::now();
        let color = if info.state == VoiceState::Ready {
            COLOR_GREEN
        } else {
            COLOR_YELLOW
        };

        Reply::Embed(
            Embed::new(color)
                .title("🎵 Voice Connection Status")
                .field("Channel", channel_name, true)
                .field("Status", info.state.as_str(), true)
                .field(
                    "Connected Since",
                    info.joined_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    true,
                )
                .field("Uptime", format_uptime(info.uptime(now)), true)
                .timestamp(now),
        )
    }

    fn health(&self) -> Reply {
        let report = self.controller.health_check();
        let color = if report.unhealthy > 0 {
            COLOR_ORANGE
        } else {
            COLOR_GREEN
        };
        let mut embed = Embed::new(color)
            .title("🏥 Voice Connection Health Check")
            .field("Total Connections", report.total.to_string(), true)
            .field("Healthy", report.healthy.to_string(), true)
            .field("Unhealthy", report.unhealthy.to_string(), true)
            .timestamp(Utc::now());

        if !report.connections.is_empty() {
            let details = report
                .connections
                .iter()
                .map(|c| {
                    let mark = if c.healthy { "✅" } else { "❌" };
                    format!("{mark} {} ({})", c.guild_name, format_uptime(c.uptime()))
                })
                .collect::<Vec<_>>()
                .join("\n");
            embed = embed.field("Connection Details", truncate_field(&details, DETAILS_LIMIT), false);
        }
        Reply::Embed(embed)
    }

    fn connections(&self, message: &IncomingMessage) -> Reply {
        if let Some(owner) = self.owner_id.as_deref()
            && owner != message.author_id
        {
            return text("❌ This command is restricted to the bot owner!");
        }

        let all = self.controller.all_connections();
        if all.is_empty() {
            return text("❌ No active voice connections!");
        }
        let list = all
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "**{}.** {}\n   Status: {}\n   Uptime: {}",
                    i + 1,
                    c.guild_name,
                    c.status,
                    format_uptime(c.uptime())
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        Reply::Embed(
            Embed::new(COLOR_BLUE)
                .title(format!("🎵 Active Voice Connections ({})", all.len()))
                .description(list)
                .timestamp(Utc::now()),
        )
    }

    fn help(&self) -> Reply {
        let p = &self.prefix;
        Reply::Embed(
            Embed::new(COLOR_BLUE)
                .title("🤖 Discord Voice Bot Commands")
                .description("Here are all available commands:")
                .field(format!("{p}join"), "Join the voice channel you are currently in", false)
                .field(format!("{p}joinid <channel_id>"), "Join a specific voice channel by ID", false)
                .field(format!("{p}leave"), "Leave the current voice channel", false)
                .field(format!("{p}status"), "Check the bot's voice connection status", false)
                .field(format!("{p}health"), "Check the health of all voice connections", false)
                .field(format!("{p}connections"), "List all voice connections (Owner only)", false)
                .field(format!("{p}help"), "Show this help message", false)
                .footer("This bot maintains 24/7 presence in voice channels")
                .timestamp(Utc::now()),
        )
    }
}
