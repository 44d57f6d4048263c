use parking_lot::RwLock;
use std::collections::HashMap;
use tether_core::{ChannelId, GuildId};

/// Per-guild channel the agent should keep presence in.
///
/// No entry means losses for that guild are not repaired.
#[derive(Default)]
pub struct TargetChannels {
    targets: RwLock<HashMap<GuildId, ChannelId>>,
}

impl TargetChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target, returning the previous one.
    pub fn set(&self, guild_id: &GuildId, channel_id: &ChannelId) -> Option<ChannelId> {
        self.targets
            .write()
            .insert(guild_id.clone(), channel_id.clone())
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<ChannelId> {
        self.targets.read().get(guild_id).cloned()
    }

    pub fn clear(&self, guild_id: &GuildId) -> Option<ChannelId> {
        self.targets.write().remove(guild_id)
    }

    pub fn clear_all(&self) {
        self.targets.write().clear();
    }

    pub fn is_target(&self, guild_id: &GuildId, channel_id: &ChannelId) -> bool {
        self.targets.read().get(guild_id) == Some(channel_id)
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}
