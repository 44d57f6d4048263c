use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{ChannelId, GuildId};

/// Presence events published by the voice core and the gateway supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Voice lifecycle ────────────────────────────────────────
    ConnectionReady {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    ConnectionRecovered {
        guild_id: GuildId,
    },
    ConnectionLost {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    ConnectionClosed {
        guild_id: GuildId,
    },
    TargetMoved {
        guild_id: GuildId,
        channel_id: ChannelId,
    },

    // ── Reconnection ───────────────────────────────────────────
    RetryScheduled {
        guild_id: GuildId,
        channel_id: ChannelId,
        attempt: u32,
        delay_ms: u64,
    },
    RetriesExhausted {
        guild_id: GuildId,
        channel_id: ChannelId,
        attempts: u32,
    },

    // ── Gateway session ────────────────────────────────────────
    GatewayLost,
    GatewayRecovered,

    // ── System ─────────────────────────────────────────────────
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Shutdown,
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
