//! Guild, channel and voice state cache fed by gateway dispatches.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::{ChannelId, ChannelInfo, ChannelKind, GuildId, Result, TetherError, UserId};
use tether_voice::GuildDirectory;
use tracing::debug;

use crate::permissions::{MemberPermissions, Overwrite, OverwriteKind, can_connect, can_speak};
use crate::rest::RestClient;

#[derive(Debug, Clone, Default)]
struct GuildEntry {
    name: String,
    owner_id: Option<UserId>,
    /// Role id to permission bits. The @everyone role has the guild's id.
    roles: HashMap<String, u64>,
    /// Role ids held by the bot, once its member object has been seen.
    bot_roles: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
struct ChannelEntry {
    id: ChannelId,
    guild_id: Option<GuildId>,
    name: String,
    kind: ChannelKind,
    overwrites: Vec<Overwrite>,
}

#[derive(Default)]
struct CacheState {
    bot_user_id: Option<UserId>,
    guilds: HashMap<GuildId, GuildEntry>,
    channels: HashMap<ChannelId, ChannelEntry>,
    voice_states: HashMap<(GuildId, UserId), ChannelId>,
}

/// Snapshot of what the gateway has told us about guilds the agent is in.
///
/// Implements [`GuildDirectory`]; channel misses fall back to a REST lookup
/// when a client is attached.
#[derive(Default)]
pub struct DirectoryCache {
    state: RwLock<CacheState>,
    rest: Option<Arc<RestClient>>,
}

fn parse_bits(value: &Value) -> u64 {
    match value {
        Value::String(s) => s.parse().unwrap_or(0),
        Value::Number(n) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

fn parse_channel(data: &Value, guild_id: Option<&str>) -> Option<ChannelEntry> {
    let id = str_field(data, "id")?;
    let overwrites = data["permission_overwrites"]
        .as_array()
        .map(|all| {
            all.iter()
                .filter_map(|o| {
                    Some(Overwrite {
                        id: str_field(o, "id")?,
                        kind: OverwriteKind::from_discord(o["type"].as_u64().unwrap_or(0)),
                        allow: parse_bits(&o["allow"]),
                        deny: parse_bits(&o["deny"]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(ChannelEntry {
        id,
        guild_id: str_field(data, "guild_id").or_else(|| guild_id.map(str::to_string)),
        name: str_field(data, "name").unwrap_or_default(),
        kind: ChannelKind::from_discord(data["type"].as_u64().unwrap_or(u64::MAX)),
        overwrites,
    })
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rest(rest: Arc<RestClient>) -> Self {
        Self {
            state: RwLock::default(),
            rest: Some(rest),
        }
    }

    // ── Dispatch intake ────────────────────────────────────────

    pub fn set_bot_user(&self, user_id: &str) {
        self.state.write().bot_user_id = Some(user_id.to_string());
    }

    pub fn bot_user_id(&self) -> Option<UserId> {
        self.state.read().bot_user_id.clone()
    }

    /// GUILD_CREATE / GUILD_UPDATE. Channels, roles, members and voice
    /// states are taken from the payload when present.
    pub fn apply_guild(&self, data: &Value) {
        let Some(guild_id) = str_field(data, "id") else {
            return;
        };
        if data["unavailable"].as_bool() == Some(true) {
            return;
        }

        let mut state = self.state.write();
        let bot_id = state.bot_user_id.clone();
        let entry = state.guilds.entry(guild_id.clone()).or_default();

        if let Some(name) = data["name"].as_str() {
            entry.name = name.to_string();
        }
        if let Some(owner) = data["owner_id"].as_str() {
            entry.owner_id = Some(owner.to_string());
        }
        if let Some(roles) = data["roles"].as_array() {
            entry.roles = roles
                .iter()
                .filter_map(|r| Some((str_field(r, "id")?, parse_bits(&r["permissions"]))))
                .collect();
        }
        if let (Some(bot_id), Some(members)) = (bot_id.as_deref(), data["members"].as_array())
            && let Some(me) = members.iter().find(|m| m["user"]["id"].as_str() == Some(bot_id))
        {
            entry.bot_roles = Some(
                me["roles"]
                    .as_array()
                    .map(|r| r.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default(),
            );
        }

        if let Some(channels) = data["channels"].as_array() {
            for channel in channels.iter().filter_map(|c| parse_channel(c, Some(&guild_id))) {
                state.channels.insert(channel.id.clone(), channel);
            }
        }
        if let Some(voice_states) = data["voice_states"].as_array() {
            for vs in voice_states {
                if let (Some(user), Some(channel)) = (str_field(vs, "user_id"), str_field(vs, "channel_id")) {
                    state.voice_states.insert((guild_id.clone(), user), channel);
                }
            }
        }
        debug!(guild = %guild_id, "guild cached");
    }

    pub fn remove_guild(&self, guild_id: &str) {
        let mut state = self.state.write();
        state.guilds.remove(guild_id);
        state
            .channels
            .retain(|_, c| c.guild_id.as_deref() != Some(guild_id));
        state.voice_states.retain(|(g, _), _| g != guild_id);
    }

    /// CHANNEL_CREATE / CHANNEL_UPDATE.
    pub fn apply_channel(&self, data: &Value) {
        if let Some(channel) = parse_channel(data, None) {
            self.state.write().channels.insert(channel.id.clone(), channel);
        }
    }

    pub fn remove_channel(&self, channel_id: &str) {
        self.state.write().channels.remove(channel_id);
    }

    /// GUILD_MEMBER_UPDATE for the bot's own member.
    pub fn apply_bot_roles(&self, guild_id: &str, roles: Vec<String>) {
        if let Some(guild) = self.state.write().guilds.get_mut(guild_id) {
            guild.bot_roles = Some(roles);
        }
    }

    /// VOICE_STATE_UPDATE. Returns the channel the user was in before.
    pub fn apply_voice_state(
        &self,
        guild_id: &str,
        user_id: &str,
        channel_id: Option<&str>,
    ) -> Option<ChannelId> {
        let key = (guild_id.to_string(), user_id.to_string());
        let mut state = self.state.write();
        match channel_id {
            Some(channel) => state.voice_states.insert(key, channel.to_string()),
            None => state.voice_states.remove(&key),
        }
    }

    // ── Queries ────────────────────────────────────────────────

    /// The voice channel a user is currently in.
    pub fn voice_channel_of(&self, guild_id: &str, user_id: &str) -> Option<ChannelId> {
        self.state
            .read()
            .voice_states
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
    }

    pub fn guild_count(&self) -> usize {
        self.state.read().guilds.len()
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.state.read().guilds.keys().cloned().collect()
    }

    pub fn channel_info(&self, channel_id: &str) -> Option<ChannelInfo> {
        let state = self.state.read();
        let channel = state.channels.get(channel_id)?;
        let (can_connect, can_speak) = Self::voice_permissions(&state, channel);
        Some(ChannelInfo {
            id: channel.id.clone(),
            guild_id: channel.guild_id.clone(),
            name: channel.name.clone(),
            kind: channel.kind,
            can_connect,
            can_speak,
        })
    }

    /// Unknown member data counts as allowed; the transport reports the failure.
    fn voice_permissions(state: &CacheState, channel: &ChannelEntry) -> (bool, bool) {
        let (Some(guild_id), Some(bot_id)) = (channel.guild_id.as_deref(), state.bot_user_id.as_deref())
        else {
            return (true, true);
        };
        let Some(guild) = state.guilds.get(guild_id) else {
            return (true, true);
        };
        let Some(bot_roles) = &guild.bot_roles else {
            return (true, true);
        };

        let roles: Vec<(String, u64)> = bot_roles
            .iter()
            .filter(|id| id.as_str() != guild_id)
            .map(|id| (id.clone(), guild.roles.get(id).copied().unwrap_or(0)))
            .collect();
        let member = MemberPermissions {
            guild_id,
            member_id: bot_id,
            owner_id: guild.owner_id.as_deref(),
            everyone: guild.roles.get(guild_id).copied().unwrap_or(0),
            roles: &roles,
        };
        let perms = member.in_channel(&channel.overwrites);
        (can_connect(perms), can_speak(perms))
    }
}

#[async_trait]
impl GuildDirectory for DirectoryCache {
    fn guild_name(&self, guild_id: &GuildId) -> Option<String> {
        self.state
            .read()
            .guilds
            .get(guild_id)
            .map(|g| g.name.clone())
            .filter(|n| !n.is_empty())
    }

    async fn resolve_channel(&self, channel_id: &ChannelId) -> Result<ChannelInfo> {
        if let Some(info) = self.channel_info(channel_id) {
            return Ok(info);
        }
        let Some(rest) = &self.rest else {
            return Err(TetherError::Validation(format!("unknown channel {channel_id}")));
        };
        let data = rest.get_channel(channel_id).await?;
        self.apply_channel(&data);
        self.channel_info(channel_id)
            .ok_or_else(|| TetherError::Validation(format!("unknown channel {channel_id}")))
    }
}
