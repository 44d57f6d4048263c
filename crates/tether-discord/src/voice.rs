//! Voice transport over the Discord voice gateway.
//!
//! Only signalling is implemented: opcode 4 on the main gateway, then the voice
//! websocket handshake up to READY, kept alive with heartbeats. No media flows.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tether_core::{ChannelId, GuildId, Result, TetherError, UserId, VoiceState};
use tether_voice::{JoinOptions, TransportHandle, TransportSession, VoiceTransport, spawn_guarded};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::DirectoryCache;
use crate::gateway::GatewaySender;

/// Voice gateway opcodes (v4).
const VOICE_OP_IDENTIFY: u64 = 0;
const VOICE_OP_READY: u64 = 2;
const VOICE_OP_HEARTBEAT: u64 = 3;
const VOICE_OP_HEARTBEAT_ACK: u64 = 6;
const VOICE_OP_HELLO: u64 = 8;

const VOICE_GATEWAY_VERSION: &str = "4";

#[derive(Debug, Clone, PartialEq, Eq)]
struct VoiceServer {
    token: String,
    endpoint: String,
}

/// Signalling state for one guild's voice session.
struct VoiceLink {
    guild_id: GuildId,
    user_id: UserId,
    channel_id: Mutex<ChannelId>,
    session_id: Mutex<Option<String>>,
    server: Mutex<Option<VoiceServer>>,
    socket: Mutex<Option<watch::Sender<bool>>>,
    states: mpsc::UnboundedSender<VoiceState>,
    destroyed: AtomicBool,
}

impl VoiceLink {
    fn emit(&self, state: VoiceState) {
        if state == VoiceState::Destroyed || !self.is_destroyed() {
            let _ = self.states.send(state);
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn stop_socket(&self) {
        if let Some(stop) = self.socket.lock().take() {
            let _ = stop.send(true);
        }
    }

    /// Open the voice websocket once both halves of the handshake are known.
    fn try_open(self: &Arc<Self>) {
        if self.is_destroyed() {
            return;
        }
        let (Some(session_id), Some(server)) =
            (self.session_id.lock().clone(), self.server.lock().clone())
        else {
            return;
        };

        self.stop_socket();
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.socket.lock() = Some(stop_tx);

        let link = Arc::clone(self);
        spawn_guarded("discord-voice-socket", async move {
            link.run_socket(session_id, server, stop_rx).await;
        });
    }

    async fn run_socket(
        self: Arc<Self>,
        session_id: String,
        server: VoiceServer,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let url = match voice_gateway_url(&server.endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!(guild = %self.guild_id, error = %e, "bad voice endpoint");
                self.emit(VoiceState::Disconnected);
                return;
            }
        };
        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(guild = %self.guild_id, error = %e, "voice websocket connection failed");
                self.emit(VoiceState::Disconnected);
                return;
            }
        };
        if *stop_rx.borrow() {
            return;
        }
        self.emit(VoiceState::Connecting);

        let (mut write, mut read) = ws_stream.split();
        let identify = json!({
            "op": VOICE_OP_IDENTIFY,
            "d": {
                "server_id": self.guild_id,
                "user_id": self.user_id,
                "session_id": session_id,
                "token": server.token,
            }
        });
        if write
            .send(Message::Text(identify.to_string().into()))
            .await
            .is_err()
        {
            self.emit(VoiceState::Disconnected);
            return;
        }

        // Replaced on HELLO.
        let idle = Duration::from_secs(3600);
        let mut heartbeat = interval_at(Instant::now() + idle, idle);
        let mut hello_seen = false;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    let _ = write.close().await;
                    return;
                }
                _ = heartbeat.tick() => {
                    if !hello_seen {
                        continue;
                    }
                    let hb = json!({ "op": VOICE_OP_HEARTBEAT, "d": chrono::Utc::now().timestamp_millis() });
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let ws_msg = match msg {
                        Some(Ok(m)) if !m.is_close() => m,
                        Some(Err(e)) => {
                            debug!(guild = %self.guild_id, error = %e, "voice websocket error");
                            break;
                        }
                        _ => break,
                    };
                    let Some(payload) = ws_msg
                        .to_text()
                        .ok()
                        .and_then(|t| serde_json::from_str::<Value>(t).ok())
                    else {
                        continue;
                    };
                    match payload["op"].as_u64().unwrap_or(u64::MAX) {
                        VOICE_OP_HELLO => {
                            let ms = payload["d"]["heartbeat_interval"].as_f64().unwrap_or(13750.0);
                            let period = Duration::from_millis(ms.max(1.0) as u64);
                            heartbeat = interval_at(Instant::now() + period, period);
                            hello_seen = true;
                        }
                        VOICE_OP_READY => {
                            info!(guild = %self.guild_id, "voice gateway ready");
                            self.emit(VoiceState::Ready);
                        }
                        VOICE_OP_HEARTBEAT_ACK => {}
                        op => debug!(op, "voice gateway: unhandled opcode"),
                    }
                }
            }
        }

        if !*stop_rx.borrow() {
            warn!(guild = %self.guild_id, "voice websocket closed");
            self.emit(VoiceState::Disconnected);
        }
    }
}

fn voice_gateway_url(endpoint: &str) -> std::result::Result<Url, url::ParseError> {
    let host = endpoint.trim_start_matches("wss://");
    let mut url = Url::parse(&format!("wss://{host}"))?;
    url.query_pairs_mut().append_pair("v", VOICE_GATEWAY_VERSION);
    Ok(url)
}

struct DiscordVoiceHandle {
    link: Arc<VoiceLink>,
    gateway: GatewaySender,
}

impl TransportHandle for DiscordVoiceHandle {
    fn destroy(&self) {
        if self.link.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.link.stop_socket();
        if let Err(e) = self
            .gateway
            .update_voice_state(&self.link.guild_id, None, false, false)
        {
            debug!(guild = %self.link.guild_id, error = %e, "could not send voice leave");
        }
        self.link.emit(VoiceState::Destroyed);
    }
}

/// [`VoiceTransport`] that speaks Discord's voice signalling.
///
/// The runtime forwards VOICE_STATE_UPDATE and VOICE_SERVER_UPDATE for the
/// bot through [`handle_voice_state`](Self::handle_voice_state) and
/// [`handle_voice_server`](Self::handle_voice_server).
pub struct DiscordVoiceTransport {
    gateway: GatewaySender,
    cache: Arc<DirectoryCache>,
    links: Mutex<HashMap<GuildId, Arc<VoiceLink>>>,
}

impl DiscordVoiceTransport {
    pub fn new(gateway: GatewaySender, cache: Arc<DirectoryCache>) -> Self {
        Self {
            gateway,
            cache,
            links: Mutex::new(HashMap::new()),
        }
    }

    fn live_link(&self, guild_id: &str) -> Option<Arc<VoiceLink>> {
        self.links
            .lock()
            .get(guild_id)
            .filter(|l| !l.is_destroyed())
            .cloned()
    }

    pub fn handle_voice_state(
        &self,
        guild_id: &str,
        user_id: &str,
        channel_id: Option<&str>,
        session_id: &str,
    ) {
        let Some(link) = self.live_link(guild_id) else {
            return;
        };
        if link.user_id != user_id {
            return;
        }
        match channel_id {
            Some(channel) => {
                *link.channel_id.lock() = channel.to_string();
                let changed = link.session_id.lock().as_deref() != Some(session_id);
                if changed {
                    *link.session_id.lock() = Some(session_id.to_string());
                    link.try_open();
                }
            }
            None => {
                link.stop_socket();
                link.emit(VoiceState::Disconnected);
            }
        }
    }

    /// A null endpoint means the voice server is being reallocated.
    pub fn handle_voice_server(&self, guild_id: &str, token: &str, endpoint: Option<&str>) {
        let Some(link) = self.live_link(guild_id) else {
            return;
        };
        match endpoint {
            Some(endpoint) => {
                *link.server.lock() = Some(VoiceServer {
                    token: token.to_string(),
                    endpoint: endpoint.to_string(),
                });
                link.try_open();
            }
            None => {
                *link.server.lock() = None;
                link.stop_socket();
                link.emit(VoiceState::Disconnected);
            }
        }
    }

    pub fn active_links(&self) -> usize {
        self.links
            .lock()
            .values()
            .filter(|l| !l.is_destroyed())
            .count()
    }
}

#[async_trait]
impl VoiceTransport for DiscordVoiceTransport {
    async fn open_session(
        &self,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        options: JoinOptions,
    ) -> Result<TransportSession> {
        let user_id = self.cache.bot_user_id().ok_or(TetherError::NotReady)?;
        let (states_tx, states) = mpsc::unbounded_channel();
        let link = Arc::new(VoiceLink {
            guild_id: guild_id.clone(),
            user_id,
            channel_id: Mutex::new(channel_id.clone()),
            session_id: Mutex::new(None),
            server: Mutex::new(None),
            socket: Mutex::new(None),
            states: states_tx,
            destroyed: AtomicBool::new(false),
        });

        self.gateway
            .update_voice_state(guild_id, Some(channel_id), options.self_mute, options.self_deaf)
            .map_err(|e| TetherError::Transport(format!("voice state update failed: {e}")))?;
        if let Some(previous) = self.links.lock().insert(guild_id.clone(), link.clone()) {
            previous.stop_socket();
        }
        link.emit(VoiceState::Signalling);

        Ok(TransportSession {
            handle: Box::new(DiscordVoiceHandle {
                link,
                gateway: self.gateway.clone(),
            }),
            states,
        })
    }
}
