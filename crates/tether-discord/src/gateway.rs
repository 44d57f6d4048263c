use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tether_core::{ChannelId, GuildId, Result, TetherError, UserId};
use tether_voice::{GatewaySession, spawn_guarded};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::cache::DirectoryCache;

/// Discord Gateway opcodes.
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_VOICE_STATE_UPDATE: u64 = 4;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_VOICE_STATES: u64 = 1 << 7;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
pub const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;
pub const INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_VOICE_STATES | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const DEFAULT_HEARTBEAT_MS: u64 = 41250;

/// A text message seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author_id: UserId,
    pub author_name: String,
    pub author_bot: bool,
    pub content: String,
}

/// What the gateway reports to the runtime. The channel outlives re-logins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready {
        user_id: UserId,
        guild_count: usize,
    },
    Message(IncomingMessage),
    VoiceStateUpdate {
        guild_id: GuildId,
        user_id: UserId,
        channel_id: Option<ChannelId>,
        session_id: String,
        previous: Option<ChannelId>,
    },
    VoiceServerUpdate {
        guild_id: GuildId,
        token: String,
        endpoint: Option<String>,
    },
    SessionLost {
        reason: String,
    },
}

/// Queue for payloads the gateway loop writes to the socket.
#[derive(Clone)]
pub struct GatewaySender {
    tx: mpsc::UnboundedSender<Value>,
    ready: Arc<AtomicBool>,
}

impl GatewaySender {
    pub fn send(&self, payload: Value) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TetherError::NotReady);
        }
        self.tx
            .send(payload)
            .map_err(|_| TetherError::Gateway("gateway outbound queue closed".into()))
    }

    /// Opcode 4. A `None` channel leaves voice in that guild.
    pub fn update_voice_state(
        &self,
        guild_id: &str,
        channel_id: Option<&str>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        self.send(voice_state_payload(guild_id, channel_id, self_mute, self_deaf))
    }
}

pub fn voice_state_payload(
    guild_id: &str,
    channel_id: Option<&str>,
    self_mute: bool,
    self_deaf: bool,
) -> Value {
    json!({
        "op": OP_VOICE_STATE_UPDATE,
        "d": {
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        }
    })
}

pub fn identify_payload(token: &str, activity: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "tether",
                "device": "tether"
            },
            "presence": {
                "activities": [ { "name": activity, "type": 0 } ],
                "status": "online",
                "since": null,
                "afk": false
            }
        }
    })
}

/// Discord gateway session.
///
/// `login` opens a websocket, identifies and resolves on READY. The loop does
/// not reconnect on its own: when the socket goes away it reports
/// [`GatewayEvent::SessionLost`] and waits for the next `login`.
pub struct DiscordGateway {
    token: String,
    activity: String,
    url: String,
    login_timeout: Duration,
    cache: Arc<DirectoryCache>,
    ready: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    outbound_tx: mpsc::UnboundedSender<Value>,
    outbound_rx: Arc<TokioMutex<mpsc::UnboundedReceiver<Value>>>,
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
}

impl DiscordGateway {
    pub fn new(
        token: impl Into<String>,
        activity: impl Into<String>,
        cache: Arc<DirectoryCache>,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let gateway = Self {
            token: token.into(),
            activity: activity.into(),
            url: DISCORD_GATEWAY_URL.to_string(),
            login_timeout: Duration::from_secs(30),
            cache,
            ready: Arc::new(AtomicBool::new(false)),
            events,
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            shutdown: parking_lot::Mutex::new(None),
        };
        (gateway, events_rx)
    }

    pub fn sender(&self) -> GatewaySender {
        GatewaySender {
            tx: self.outbound_tx.clone(),
            ready: self.ready.clone(),
        }
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.cache
    }

    fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        self.ready.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewaySession for DiscordGateway {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn login(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(TetherError::Gateway("no bot token configured".into()));
        }
        self.stop();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);
        let (ready_tx, ready_rx) = oneshot::channel();

        let session = GatewayLoop {
            token: self.token.clone(),
            activity: self.activity.clone(),
            url: self.url.clone(),
            cache: self.cache.clone(),
            ready: self.ready.clone(),
            events: self.events.clone(),
            outbound: self.outbound_rx.clone(),
        };
        spawn_guarded("discord-gateway", async move {
            session.run(shutdown_rx, ready_tx).await;
        });

        match tokio::time::timeout(self.login_timeout, ready_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TetherError::Gateway(
                "gateway session ended before READY".into(),
            )),
            Err(_) => {
                self.stop();
                Err(TetherError::Gateway("timed out waiting for READY".into()))
            }
        }
    }

    async fn destroy(&self) -> Result<()> {
        self.stop();
        info!("Discord gateway session destroyed");
        Ok(())
    }
}

struct GatewayLoop {
    token: String,
    activity: String,
    url: String,
    cache: Arc<DirectoryCache>,
    ready: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    outbound: Arc<TokioMutex<mpsc::UnboundedReceiver<Value>>>,
}

impl GatewayLoop {
    async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        ready_tx: oneshot::Sender<Result<()>>,
    ) {
        let mut ready_tx = Some(ready_tx);
        let reason = self.session(&mut shutdown_rx, &mut ready_tx).await;
        let was_ready = self.ready.swap(false, Ordering::SeqCst);

        let Some(reason) = reason else {
            return;
        };
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(TetherError::Gateway(reason)));
        } else if was_ready {
            warn!(reason = %reason, "Discord gateway session lost");
            let _ = self.events.send(GatewayEvent::SessionLost { reason });
        }
    }

    /// One websocket session. Returns why it ended, or `None` on shutdown.
    async fn session(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        ready_tx: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> Option<String> {
        info!("Discord: connecting to Gateway...");
        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "Discord Gateway connection failed");
                return Some(format!("connection failed: {e}"));
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let heartbeat_ms = match read.next().await {
            Some(Ok(msg)) => {
                let payload: Value = msg
                    .to_text()
                    .ok()
                    .and_then(|t| serde_json::from_str(t).ok())
                    .unwrap_or_default();
                if payload["op"].as_u64() == Some(OP_HELLO) {
                    payload["d"]["heartbeat_interval"]
                        .as_u64()
                        .unwrap_or(DEFAULT_HEARTBEAT_MS)
                } else {
                    warn!(op = %payload["op"], "Discord: expected HELLO");
                    DEFAULT_HEARTBEAT_MS
                }
            }
            _ => return Some("no HELLO received".into()),
        };

        let identify = identify_payload(&self.token, &self.activity);
        if let Err(e) = write.send(Message::Text(identify.to_string().into())).await {
            return Some(format!("failed to send IDENTIFY: {e}"));
        }

        // Stale voice updates from a previous session must not replay.
        let mut outbound = self.outbound.lock().await;
        while outbound.try_recv().is_ok() {}

        let mut sequence: Option<u64> = None;
        let mut awaiting_ack = false;
        let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = write.close().await;
                        return None;
                    }
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        return Some("heartbeat not acknowledged".into());
                    }
                    let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                    if let Err(e) = write.send(Message::Text(hb.to_string().into())).await {
                        return Some(format!("heartbeat send failed: {e}"));
                    }
                    awaiting_ack = true;
                }
                Some(payload) = outbound.recv() => {
                    if let Err(e) = write.send(Message::Text(payload.to_string().into())).await {
                        return Some(format!("send failed: {e}"));
                    }
                }
                msg = read.next() => {
                    let ws_msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => return Some(format!("websocket error: {e}")),
                        None => return Some("websocket stream ended".into()),
                    };
                    if let Message::Close(frame) = &ws_msg {
                        return Some(match frame {
                            Some(f) if u16::from(f.code) == 4004 => "authentication failed".to_string(),
                            Some(f) => format!("closed by server: {} {}", u16::from(f.code), f.reason),
                            None => "closed by server".to_string(),
                        });
                    }
                    let Some(payload) = ws_msg
                        .to_text()
                        .ok()
                        .and_then(|t| serde_json::from_str::<Value>(t).ok())
                    else {
                        continue;
                    };
                    if let Some(s) = payload["s"].as_u64() {
                        sequence = Some(s);
                    }

                    match payload["op"].as_u64().unwrap_or(u64::MAX) {
                        OP_DISPATCH => {
                            let name = payload["t"].as_str().unwrap_or("");
                            let Some(event) = dispatch(&self.cache, name, &payload["d"]) else {
                                continue;
                            };
                            if matches!(event, GatewayEvent::Ready { .. }) {
                                self.ready.store(true, Ordering::SeqCst);
                                if let Some(tx) = ready_tx.take() {
                                    let _ = tx.send(Ok(()));
                                }
                            }
                            let _ = self.events.send(event);
                        }
                        OP_HEARTBEAT_ACK => awaiting_ack = false,
                        OP_HEARTBEAT => {
                            let hb = json!({ "op": OP_HEARTBEAT, "d": sequence });
                            let _ = write.send(Message::Text(hb.to_string().into())).await;
                        }
                        OP_RECONNECT => return Some("server requested reconnect".into()),
                        OP_INVALID_SESSION => return Some("invalid session".into()),
                        op => debug!(op, "Discord: unhandled opcode"),
                    }
                }
            }
        }
    }
}

/// Apply a DISPATCH payload to the cache and translate it for the runtime.
pub fn dispatch(cache: &DirectoryCache, name: &str, data: &Value) -> Option<GatewayEvent> {
    match name {
        "READY" => {
            let user_id = data["user"]["id"].as_str()?.to_string();
            cache.set_bot_user(&user_id);
            let guild_count = data["guilds"].as_array().map(Vec::len).unwrap_or(0);
            info!(bot_id = %user_id, guilds = guild_count, "Discord bot ready");
            Some(GatewayEvent::Ready {
                user_id,
                guild_count,
            })
        }
        "GUILD_CREATE" | "GUILD_UPDATE" => {
            cache.apply_guild(data);
            None
        }
        "GUILD_DELETE" => {
            if let Some(id) = data["id"].as_str() {
                cache.remove_guild(id);
            }
            None
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            cache.apply_channel(data);
            None
        }
        "CHANNEL_DELETE" => {
            if let Some(id) = data["id"].as_str() {
                cache.remove_channel(id);
            }
            None
        }
        "VOICE_STATE_UPDATE" => {
            let guild_id = data["guild_id"].as_str()?.to_string();
            let user_id = data["user_id"].as_str()?.to_string();
            let channel_id = data["channel_id"].as_str().map(str::to_string);
            let previous = cache.apply_voice_state(&guild_id, &user_id, channel_id.as_deref());
            Some(GatewayEvent::VoiceStateUpdate {
                guild_id,
                user_id,
                channel_id,
                session_id: data["session_id"].as_str().unwrap_or("").to_string(),
                previous,
            })
        }
        "VOICE_SERVER_UPDATE" => Some(GatewayEvent::VoiceServerUpdate {
            guild_id: data["guild_id"].as_str()?.to_string(),
            token: data["token"].as_str().unwrap_or("").to_string(),
            endpoint: data["endpoint"].as_str().map(str::to_string),
        }),
        "MESSAGE_CREATE" => Some(GatewayEvent::Message(IncomingMessage {
            id: data["id"].as_str()?.to_string(),
            channel_id: data["channel_id"].as_str()?.to_string(),
            guild_id: data["guild_id"].as_str().map(str::to_string),
            author_id: data["author"]["id"].as_str().unwrap_or("").to_string(),
            author_name: data["author"]["username"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            author_bot: data["author"]["bot"].as_bool().unwrap_or(false),
            content: data["content"].as_str().unwrap_or("").to_string(),
        })),
        _ => {
            debug!(event = %name, "Discord: unhandled dispatch event");
            None
        }
    }
}
