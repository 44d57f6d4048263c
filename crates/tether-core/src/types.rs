use serde::{Deserialize, Serialize};
use std::fmt;

/// Discord snowflake for a guild.
pub type GuildId = String;

/// Discord snowflake for a channel (voice or text).
pub type ChannelId = String;

/// Discord snowflake for a user.
pub type UserId = String;

/// Lifecycle state of one voice transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    Connecting,
    Signalling,
    Ready,
    Disconnected,
    Destroyed,
}

impl VoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceState::Connecting => "connecting",
            VoiceState::Signalling => "signalling",
            VoiceState::Ready => "ready",
            VoiceState::Disconnected => "disconnected",
            VoiceState::Destroyed => "destroyed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, VoiceState::Ready)
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse channel classification, enough to tell voice-capable channels apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Stage,
    Category,
    Other,
}

impl ChannelKind {
    /// Map a Discord channel `type` number.
    pub fn from_discord(kind: u64) -> Self {
        match kind {
            0 | 5 => ChannelKind::Text,
            2 => ChannelKind::Voice,
            4 => ChannelKind::Category,
            13 => ChannelKind::Stage,
            _ => ChannelKind::Other,
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self, ChannelKind::Voice | ChannelKind::Stage)
    }
}

/// What the directory knows about a channel, including the agent's own capabilities on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    /// `None` for DM channels.
    pub guild_id: Option<GuildId>,
    pub name: String,
    pub kind: ChannelKind,
    pub can_connect: bool,
    pub can_speak: bool,
}
