//! In-memory collaborators for tests.
//!
//! `MockTransport` hands out scripted sessions whose state streams the test can
//! drive, `MockDirectory` answers channel lookups from a table, and
//! `MockGateway` stands in for the upstream session.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tether_core::{ChannelId, ChannelInfo, ChannelKind, GuildId, Result, TetherError, VoiceState};
use tokio::sync::mpsc;

use crate::transport::{
    GatewaySession, GuildDirectory, JoinOptions, TransportHandle, TransportSession, VoiceTransport,
};

// ── Transport ──────────────────────────────────────────────────

/// What a new session does right after it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Signalling, then Ready.
    Ready,
    /// Signalling, then nothing.
    Hang,
    /// Signalling, then Disconnected.
    Drop,
    /// `open_session` fails.
    Fail,
}

/// One session opened through [`MockTransport`].
pub struct MockSession {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub options: JoinOptions,
    tx: mpsc::UnboundedSender<VoiceState>,
    destroyed: Arc<AtomicBool>,
}

impl MockSession {
    /// Push a state notification into the session's stream.
    pub fn emit(&self, state: VoiceState) {
        let _ = self.tx.send(state);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct MockHandle {
    tx: mpsc::UnboundedSender<VoiceState>,
    destroyed: Arc<AtomicBool>,
}

impl TransportHandle for MockHandle {
    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(VoiceState::Destroyed);
        }
    }
}

pub struct MockTransport {
    default: RwLock<MockBehavior>,
    per_channel: RwLock<HashMap<ChannelId, MockBehavior>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    failures: AtomicU32,
    open_delay: RwLock<Option<Duration>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(MockBehavior::Ready)
    }
}

impl MockTransport {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            default: RwLock::new(default),
            per_channel: RwLock::new(HashMap::new()),
            sessions: Mutex::new(Vec::new()),
            failures: AtomicU32::new(0),
            open_delay: RwLock::new(None),
        }
    }

    pub fn set_default(&self, behavior: MockBehavior) {
        *self.default.write() = behavior;
    }

    pub fn set_behavior(&self, channel_id: &str, behavior: MockBehavior) {
        self.per_channel
            .write()
            .insert(channel_id.to_string(), behavior);
    }

    /// Make `open_session` take `delay` before answering.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.write() = Some(delay);
    }

    /// Every session opened so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|s| !s.is_destroyed())
            .count()
    }

    /// Calls to `open_session`, including failed ones.
    pub fn open_count(&self) -> usize {
        self.sessions.lock().len() + self.failures.load(Ordering::SeqCst) as usize
    }

    fn behavior_for(&self, channel_id: &ChannelId) -> MockBehavior {
        self.per_channel
            .read()
            .get(channel_id)
            .copied()
            .unwrap_or(*self.default.read())
    }
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn open_session(
        &self,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        options: JoinOptions,
    ) -> Result<TransportSession> {
        let delay = *self.open_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self.behavior_for(channel_id);
        if behavior == MockBehavior::Fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(TetherError::Transport(format!(
                "mock transport refused {channel_id}"
            )));
        }

        let (tx, states) = mpsc::unbounded_channel();
        let destroyed = Arc::new(AtomicBool::new(false));
        let _ = tx.send(VoiceState::Signalling);
        match behavior {
            MockBehavior::Ready => {
                let _ = tx.send(VoiceState::Ready);
            }
            MockBehavior::Drop => {
                let _ = tx.send(VoiceState::Disconnected);
            }
            MockBehavior::Hang | MockBehavior::Fail => {}
        }

        self.sessions.lock().push(Arc::new(MockSession {
            guild_id: guild_id.clone(),
            channel_id: channel_id.clone(),
            options,
            tx: tx.clone(),
            destroyed: destroyed.clone(),
        }));

        Ok(TransportSession {
            handle: Box::new(MockHandle { tx, destroyed }),
            states,
        })
    }
}

// ── Directory ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDirectory {
    guilds: RwLock<HashMap<GuildId, String>>,
    channels: RwLock<HashMap<ChannelId, ChannelInfo>>,
    resolve_delay: RwLock<Option<Duration>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(self, guild_id: &str, name: &str) -> Self {
        self.guilds
            .write()
            .insert(guild_id.to_string(), name.to_string());
        self
    }

    /// A voice channel the agent may connect and speak in.
    pub fn with_voice_channel(self, guild_id: &str, channel_id: &str, name: &str) -> Self {
        self.with_channel(ChannelInfo {
            id: channel_id.to_string(),
            guild_id: Some(guild_id.to_string()),
            name: name.to_string(),
            kind: ChannelKind::Voice,
            can_connect: true,
            can_speak: true,
        })
    }

    pub fn with_channel(self, channel: ChannelInfo) -> Self {
        self.insert_channel(channel);
        self
    }

    pub fn insert_channel(&self, channel: ChannelInfo) {
        self.channels.write().insert(channel.id.clone(), channel);
    }

    /// Make channel lookups take `delay` before answering.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.write() = Some(delay);
    }
}

#[async_trait]
impl GuildDirectory for MockDirectory {
    fn guild_name(&self, guild_id: &GuildId) -> Option<String> {
        self.guilds.read().get(guild_id).cloned()
    }

    async fn resolve_channel(&self, channel_id: &ChannelId) -> Result<ChannelInfo> {
        let delay = *self.resolve_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.channels
            .read()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| TetherError::Validation(format!("unknown channel {channel_id}")))
    }
}

// ── Gateway ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockGateway {
    ready: AtomicBool,
    failing_logins: AtomicU32,
    logins: AtomicU32,
    destroys: AtomicU32,
}

impl MockGateway {
    pub fn new(ready: bool) -> Self {
        let gateway = Self::default();
        gateway.set_ready(ready);
        gateway
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next `n` logins fail.
    pub fn fail_next_logins(&self, n: u32) {
        self.failing_logins.store(n, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> u32 {
        self.destroys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewaySession for MockGateway {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn login(&self) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_logins.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_logins.store(failing - 1, Ordering::SeqCst);
            return Err(TetherError::Gateway("mock login refused".into()));
        }
        self.set_ready(true);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.set_ready(false);
        Ok(())
    }
}
