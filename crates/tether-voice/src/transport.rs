//! Seams to the collaborators that actually speak to the platform.

use async_trait::async_trait;
use tether_core::{ChannelId, ChannelInfo, GuildId, Result, VoiceState};
use tokio::sync::mpsc;

/// Flags sent with a voice join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    pub self_deaf: bool,
    pub self_mute: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            self_deaf: true,
            self_mute: false,
        }
    }
}

/// Ownership of one live transport session.
pub trait TransportHandle: Send + Sync {
    /// Release every resource held by the session.
    ///
    /// Must be idempotent. The session's state stream eventually yields
    /// [`VoiceState::Destroyed`] and then closes.
    fn destroy(&self);
}

/// A freshly opened transport session: the handle plus its ordered state stream.
pub struct TransportSession {
    pub handle: Box<dyn TransportHandle>,
    pub states: mpsc::UnboundedReceiver<VoiceState>,
}

/// Opens voice transport sessions.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn open_session(
        &self,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        options: JoinOptions,
    ) -> Result<TransportSession>;
}

/// Lookup of guild and channel metadata.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    fn guild_name(&self, guild_id: &GuildId) -> Option<String>;

    /// Resolve a channel, including whether the agent may connect and speak in it.
    async fn resolve_channel(&self, channel_id: &ChannelId) -> Result<ChannelInfo>;
}

/// The upstream gateway session watched by the session supervisor.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn login(&self) -> Result<()>;

    async fn destroy(&self) -> Result<()>;
}
