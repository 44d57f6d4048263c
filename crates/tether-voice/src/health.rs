//! Read-only health views over registry snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tether_core::{ChannelId, GuildId, VoiceState};

use crate::registry::ConnectionInfo;
use crate::transport::GuildDirectory;

/// Shown when the directory can't name a guild.
pub const UNKNOWN_GUILD: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub status: VoiceState,
    pub healthy: bool,
    pub uptime_ms: u64,
}

impl ConnectionHealth {
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }
}

/// Fleet-wide health. `healthy + unhealthy == total` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub connections: Vec<ConnectionHealth>,
}

/// One row of the connection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub channel_id: ChannelId,
    pub status: VoiceState,
    pub joined_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

impl ConnectionSummary {
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }
}

fn guild_name(directory: &dyn GuildDirectory, guild_id: &GuildId) -> String {
    directory
        .guild_name(guild_id)
        .unwrap_or_else(|| UNKNOWN_GUILD.to_string())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A connection is healthy iff its state is Ready.
pub fn health_check(
    connections: &[ConnectionInfo],
    directory: &dyn GuildDirectory,
    now: DateTime<Utc>,
) -> HealthReport {
    let details: Vec<ConnectionHealth> = connections
        .iter()
        .map(|c| ConnectionHealth {
            guild_id: c.guild_id.clone(),
            guild_name: guild_name(directory, &c.guild_id),
            status: c.state,
            healthy: c.state.is_ready(),
            uptime_ms: millis(c.uptime(now)),
        })
        .collect();
    let healthy = details.iter().filter(|d| d.healthy).count();
    HealthReport {
        total: details.len(),
        healthy,
        unhealthy: details.len() - healthy,
        connections: details,
    }
}

pub fn summarize(
    connections: &[ConnectionInfo],
    directory: &dyn GuildDirectory,
    now: DateTime<Utc>,
) -> Vec<ConnectionSummary> {
    connections
        .iter()
        .map(|c| ConnectionSummary {
            guild_id: c.guild_id.clone(),
            guild_name: guild_name(directory, &c.guild_id),
            channel_id: c.channel_id.clone(),
            status: c.state,
            joined_at: c.joined_at,
            uptime_ms: millis(c.uptime(now)),
        })
        .collect()
}
