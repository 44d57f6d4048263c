use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tether_core::{ChannelId, GuildId, VoiceState};

use crate::transport::TransportHandle;

/// Identifies one transport session so stale observers can't touch a newer record.
pub type SessionId = u64;

/// The live connection for one guild.
pub struct ConnectionRecord {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    pub handle: Box<dyn TransportHandle>,
    pub joined_at: DateTime<Utc>,
    pub state: VoiceState,
}

impl ConnectionRecord {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            state: self.state,
            joined_at: self.joined_at,
        }
    }
}

/// Read-only copy of a [`ConnectionRecord`], without the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub state: VoiceState,
    pub joined_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.joined_at).to_std().unwrap_or_default()
    }
}

/// Guild id to connection record, at most one per guild.
///
/// Every mutation takes the single write lock, so no partial update is observable.
/// Handles are destroyed outside the lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    records: RwLock<HashMap<GuildId, ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, destroying and returning whatever it replaced.
    pub fn insert(&self, record: ConnectionRecord) -> Option<ConnectionInfo> {
        let previous = self
            .records
            .write()
            .insert(record.guild_id.clone(), record);
        previous.map(|old| {
            old.handle.destroy();
            old.info()
        })
    }

    /// Remove the guild's record regardless of session. The caller owns the handle.
    pub fn remove(&self, guild_id: &GuildId) -> Option<ConnectionRecord> {
        self.records.write().remove(guild_id)
    }

    /// Remove the guild's record only if it still belongs to `session_id`.
    pub fn remove_session(
        &self,
        guild_id: &GuildId,
        session_id: SessionId,
    ) -> Option<ConnectionRecord> {
        let mut records = self.records.write();
        match records.get(guild_id) {
            Some(record) if record.session_id == session_id => records.remove(guild_id),
            _ => None,
        }
    }

    /// Record a state change for a session. Returns false if the session is no longer current.
    pub fn set_state(&self, guild_id: &GuildId, session_id: SessionId, state: VoiceState) -> bool {
        match self.records.write().get_mut(guild_id) {
            Some(record) if record.session_id == session_id => {
                record.state = state;
                true
            }
            _ => false,
        }
    }

    /// Point the guild's record at another channel without touching its state.
    pub fn set_channel(&self, guild_id: &GuildId, channel_id: &ChannelId) -> bool {
        match self.records.write().get_mut(guild_id) {
            Some(record) => {
                record.channel_id = channel_id.clone();
                true
            }
            None => false,
        }
    }

    /// Stamp a successful join.
    pub fn mark_joined(&self, guild_id: &GuildId, session_id: SessionId, at: DateTime<Utc>) -> bool {
        match self.records.write().get_mut(guild_id) {
            Some(record) if record.session_id == session_id => {
                record.joined_at = at;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<ConnectionInfo> {
        self.records.read().get(guild_id).map(ConnectionRecord::info)
    }

    pub fn state_of(&self, guild_id: &GuildId) -> Option<VoiceState> {
        self.records.read().get(guild_id).map(|r| r.state)
    }

    /// All records, ordered by guild id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self
            .records
            .read()
            .values()
            .map(ConnectionRecord::info)
            .collect();
        all.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        all
    }

    /// Take every record out of the registry.
    pub fn drain(&self) -> Vec<ConnectionRecord> {
        self.records.write().drain().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
