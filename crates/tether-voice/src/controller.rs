use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tether_config::TetherConfig;
use tether_core::{
    ChannelId, ChannelInfo, Event, EventBus, GuildId, Result, TetherError, VoiceState,
};
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::guard::spawn_guarded;
use crate::health::{self, ConnectionSummary, HealthReport};
use crate::machine::{HealOutcome, Transition, await_self_heal, transition};
use crate::registry::{ConnectionInfo, ConnectionRecord, ConnectionRegistry, SessionId};
use crate::scheduler::{BackoffPolicy, ReconnectScheduler, RetryPlan};
use crate::target::TargetChannels;
use crate::transport::{GuildDirectory, JoinOptions, VoiceTransport};

/// Timing and policy knobs for the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub join_timeout: Duration,
    pub self_heal_window: Duration,
    pub backoff: BackoffPolicy,
    pub join_options: JoinOptions,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(30),
            self_heal_window: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            join_options: JoinOptions::default(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            join_timeout: config.voice.join_timeout(),
            self_heal_window: config.voice.self_heal_window(),
            backoff: BackoffPolicy::new(
                config.voice.reconnect_base_delay(),
                config.voice.max_reconnect_attempts,
            ),
            join_options: JoinOptions {
                self_deaf: config.discord.self_deaf,
                self_mute: config.discord.self_mute,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinOrigin {
    Manual,
    Retry,
}

/// Join progress as seen by the observer, published to the waiting `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Ready,
    Closed,
}

/// Per-guild voice connection lifecycle controller.
///
/// Owns the registry, the target store and the reconnection scheduler. Joins and
/// teardowns for one guild run under that guild's async lock; a later `join` or
/// `leave` cancels whatever join is still in flight for the guild.
pub struct VoiceController {
    settings: ControllerSettings,
    transport: Arc<dyn VoiceTransport>,
    directory: Arc<dyn GuildDirectory>,
    registry: ConnectionRegistry,
    targets: TargetChannels,
    scheduler: ReconnectScheduler,
    events: EventBus,
    guild_locks: Mutex<HashMap<GuildId, Arc<TokioMutex<()>>>>,
    in_flight: Mutex<HashMap<GuildId, CancellationToken>>,
    next_session: AtomicU64,
}

impl VoiceController {
    pub fn new(
        settings: ControllerSettings,
        transport: Arc<dyn VoiceTransport>,
        directory: Arc<dyn GuildDirectory>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            transport,
            directory,
            registry: ConnectionRegistry::new(),
            targets: TargetChannels::new(),
            scheduler: ReconnectScheduler::new(settings.backoff),
            events,
            guild_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    // ── Commands ───────────────────────────────────────────────

    /// Join `channel_id` and keep presence there.
    ///
    /// Any existing connection for the guild is torn down first. A manual join
    /// cancels a pending retry and restores the full retry budget. Resolves once
    /// the transport reports Ready, or fails after the join timeout.
    pub async fn join(
        self: &Arc<Self>,
        guild_id: &GuildId,
        channel_id: &ChannelId,
    ) -> Result<ConnectionInfo> {
        let abort = self.supersede(guild_id);
        self.scheduler.cancel_pending(guild_id);
        self.scheduler.reset(guild_id);
        self.establish(guild_id, channel_id, abort, JoinOrigin::Manual)
            .await
    }

    /// Stop keeping presence in the guild. Returns whether a connection existed.
    pub async fn leave(&self, guild_id: &GuildId) -> bool {
        self.targets.clear(guild_id);
        self.scheduler.clear(guild_id);
        if let Some(token) = self.in_flight.lock().remove(guild_id) {
            token.cancel();
        }

        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        // An aborted join may have set the target while we waited for the lock.
        self.targets.clear(guild_id);
        match self.registry.remove(guild_id) {
            Some(record) => {
                info!(guild = %guild_id, channel = %record.channel_id, "leaving voice channel");
                record.handle.destroy();
                self.events.publish(Event::ConnectionClosed {
                    guild_id: guild_id.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Tear down every connection and forget all targets, counters and retries.
    pub fn disconnect_all(&self) {
        info!(connections = self.registry.len(), "disconnecting from all voice channels");
        self.targets.clear_all();
        self.scheduler.clear_all();
        for (_, token) in self.in_flight.lock().drain() {
            token.cancel();
        }
        for record in self.registry.drain() {
            record.handle.destroy();
        }
    }

    /// Someone moved the agent to another channel: follow it.
    pub fn on_agent_moved(&self, guild_id: &GuildId, channel_id: &ChannelId) {
        if self.targets.get(guild_id).is_none() || self.targets.is_target(guild_id, channel_id) {
            return;
        }
        info!(guild = %guild_id, channel = %channel_id, "agent moved, following to new channel");
        self.targets.set(guild_id, channel_id);
        self.registry.set_channel(guild_id, channel_id);
        self.events.publish(Event::TargetMoved {
            guild_id: guild_id.clone(),
            channel_id: channel_id.clone(),
        });
    }

    /// Someone disconnected the agent from voice.
    ///
    /// After the self-heal window, if the guild still has a target and no live
    /// connection, the connection is torn down and a retry scheduled.
    pub fn on_forced_disconnect(self: &Arc<Self>, guild_id: &GuildId) {
        if self.targets.get(guild_id).is_none() {
            debug!(guild = %guild_id, "disconnected without a target channel, staying out");
            return;
        }
        warn!(guild = %guild_id, "agent was disconnected from its voice channel");

        let controller = Arc::clone(self);
        let guild_id = guild_id.clone();
        spawn_guarded("voice-forced-disconnect", async move {
            tokio::time::sleep(controller.settings.self_heal_window).await;
            controller.repair_after_forced_disconnect(&guild_id).await;
        });
    }

    async fn repair_after_forced_disconnect(self: &Arc<Self>, guild_id: &GuildId) {
        let Some(target) = self.targets.get(guild_id) else {
            return;
        };
        {
            let lock = self.guild_lock(guild_id);
            let _guard = lock.lock().await;
            match self.registry.state_of(guild_id) {
                Some(VoiceState::Ready | VoiceState::Signalling | VoiceState::Connecting) => {
                    debug!(guild = %guild_id, "presence already restored");
                    return;
                }
                _ => {}
            }
            if let Some(record) = self.registry.remove(guild_id) {
                record.handle.destroy();
                self.events.publish(Event::ConnectionLost {
                    guild_id: guild_id.clone(),
                    channel_id: record.channel_id.clone(),
                });
            }
        }
        if self.scheduler.has_pending(guild_id) {
            debug!(guild = %guild_id, "reconnection already scheduled");
            return;
        }
        self.schedule_retry(guild_id, &target);
    }

    // ── Reconnection ───────────────────────────────────────────

    /// Schedule the next automatic reconnect for a guild, or give up once the
    /// attempt budget is spent.
    pub fn schedule_retry(self: &Arc<Self>, guild_id: &GuildId, channel_id: &ChannelId) {
        if self.targets.get(guild_id).is_none() {
            debug!(guild = %guild_id, "no target channel, not scheduling a reconnect");
            return;
        }

        match self.scheduler.plan(guild_id) {
            RetryPlan::Exhausted { attempts } => {
                let err = TetherError::ExhaustedRetries {
                    guild_id: guild_id.clone(),
                    attempts,
                };
                error!(guild = %guild_id, attempts, error = %err, "max reconnection attempts reached");
                self.events.publish(Event::RetriesExhausted {
                    guild_id: guild_id.clone(),
                    channel_id: channel_id.clone(),
                    attempts,
                });
            }
            RetryPlan::Scheduled {
                attempt,
                delay,
                ticket,
                token,
            } => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(
                    guild = %guild_id,
                    channel = %channel_id,
                    delay_ms,
                    attempt = attempt + 1,
                    max_attempts = self.settings.backoff.max_attempts,
                    "reconnecting"
                );
                self.events.publish(Event::RetryScheduled {
                    guild_id: guild_id.clone(),
                    channel_id: channel_id.clone(),
                    attempt,
                    delay_ms,
                });

                let controller = Arc::clone(self);
                let guild_id = guild_id.clone();
                spawn_guarded("voice-retry", async move {
                    controller.run_retry(guild_id, ticket, token, delay).await;
                });
            }
        }
    }

    async fn run_retry(
        self: Arc<Self>,
        guild_id: GuildId,
        ticket: u64,
        token: CancellationToken,
        delay: Duration,
    ) {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(guild = %guild_id, "pending reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(attempts) = self.scheduler.begin_attempt(&guild_id, ticket) else {
            return;
        };
        let Some(channel_id) = self.targets.get(&guild_id) else {
            return;
        };

        let abort = self.supersede(&guild_id);
        match self
            .establish(&guild_id, &channel_id, abort, JoinOrigin::Retry)
            .await
        {
            Ok(_) => info!(guild = %guild_id, attempts, "reconnection successful"),
            Err(TetherError::JoinAborted { .. }) => {
                debug!(guild = %guild_id, "reconnect superseded");
            }
            Err(e) => {
                error!(guild = %guild_id, attempts, error = %e, kind = e.as_label(), "reconnection failed");
                self.schedule_retry(&guild_id, &channel_id);
            }
        }
    }

    // ── Join internals ─────────────────────────────────────────

    /// Register a new in-flight operation for the guild, cancelling the previous one.
    fn supersede(&self, guild_id: &GuildId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .in_flight
            .lock()
            .insert(guild_id.clone(), token.clone())
        {
            previous.cancel();
        }
        token
    }

    fn guild_lock(&self, guild_id: &GuildId) -> Arc<TokioMutex<()>> {
        Arc::clone(
            self.guild_locks
                .lock()
                .entry(guild_id.clone())
                .or_insert_with(|| Arc::new(TokioMutex::new(()))),
        )
    }

    async fn establish(
        self: &Arc<Self>,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        abort: CancellationToken,
        origin: JoinOrigin,
    ) -> Result<ConnectionInfo> {
        let aborted = || TetherError::JoinAborted {
            guild_id: guild_id.clone(),
        };
        let superseded = || {
            abort.is_cancelled()
                || (origin == JoinOrigin::Retry && !self.targets.is_target(guild_id, channel_id))
        };

        let lock = self.guild_lock(guild_id);
        let _guard = tokio::select! {
            guard = lock.lock_owned() => guard,
            _ = abort.cancelled() => return Err(aborted()),
        };
        if superseded() {
            return Err(aborted());
        }

        let channel = self.validate(guild_id, channel_id).await?;
        if superseded() {
            return Err(aborted());
        }

        if let Some(existing) = self.registry.remove(guild_id) {
            info!(guild = %guild_id, channel = %existing.channel_id, "destroying existing connection");
            existing.handle.destroy();
        }

        info!(guild = %guild_id, channel = %channel.name, "joining voice channel");
        let session = self
            .transport
            .open_session(guild_id, channel_id, self.settings.join_options)
            .await?;
        if superseded() {
            debug!(guild = %guild_id, "join superseded while opening the session");
            session.handle.destroy();
            return Err(aborted());
        }

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (progress_tx, mut progress_rx) = watch::channel(Progress::Pending);
        self.registry.insert(ConnectionRecord {
            guild_id: guild_id.clone(),
            channel_id: channel_id.clone(),
            session_id,
            handle: session.handle,
            joined_at: Utc::now(),
            state: VoiceState::Connecting,
        });
        self.spawn_observer(guild_id, channel_id, session_id, origin, session.states, progress_tx);
        self.targets.set(guild_id, channel_id);

        let ready = async {
            progress_rx
                .wait_for(|p| *p != Progress::Pending)
                .await
                .map(|p| *p)
                .unwrap_or(Progress::Closed)
        };
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(self.settings.join_timeout, ready) => outcome,
            _ = abort.cancelled() => return Err(aborted()),
        };

        match outcome {
            Ok(Progress::Ready) => {
                self.registry.mark_joined(guild_id, session_id, Utc::now());
                self.scheduler.reset(guild_id);
                info!(guild = %guild_id, channel = %channel.name, "connected to voice channel");
                self.events.publish(Event::ConnectionReady {
                    guild_id: guild_id.clone(),
                    channel_id: channel_id.clone(),
                });
                self.registry
                    .get(guild_id)
                    .ok_or_else(|| TetherError::Transport("connection closed right after joining".into()))
            }
            Ok(_) => {
                self.discard_session(guild_id, session_id);
                Err(TetherError::Transport(
                    "voice session closed before it became ready".into(),
                ))
            }
            Err(_) => {
                let secs = self.settings.join_timeout.as_secs();
                warn!(guild = %guild_id, secs, "voice connection did not become ready in time");
                self.discard_session(guild_id, session_id);
                Err(TetherError::Timeout {
                    guild_id: guild_id.clone(),
                    secs,
                })
            }
        }
    }

    async fn validate(&self, guild_id: &GuildId, channel_id: &ChannelId) -> Result<ChannelInfo> {
        let channel = match self.directory.resolve_channel(channel_id).await {
            Ok(channel) => channel,
            Err(e @ (TetherError::Validation(_) | TetherError::Permission(_))) => return Err(e),
            Err(e) => {
                return Err(TetherError::Validation(format!(
                    "voice channel {channel_id} not found: {e}"
                )));
            }
        };
        if !channel.kind.is_voice() {
            return Err(TetherError::Validation(format!(
                "channel {} is not a voice channel",
                channel.name
            )));
        }
        if channel.guild_id.as_ref() != Some(guild_id) {
            return Err(TetherError::Validation(format!(
                "channel {} belongs to a different guild",
                channel.name
            )));
        }
        if !(channel.can_connect && channel.can_speak) {
            return Err(TetherError::Permission(format!(
                "missing connect or speak permission in {}",
                channel.name
            )));
        }
        Ok(channel)
    }

    /// Drop a session that never made it to Ready. A late Ready is then ignored.
    fn discard_session(&self, guild_id: &GuildId, session_id: SessionId) {
        if let Some(record) = self.registry.remove_session(guild_id, session_id) {
            record.handle.destroy();
        }
    }

    // ── Observation ────────────────────────────────────────────

    fn spawn_observer(
        self: &Arc<Self>,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        session_id: SessionId,
        origin: JoinOrigin,
        states: mpsc::UnboundedReceiver<VoiceState>,
        progress: watch::Sender<Progress>,
    ) {
        let controller = Arc::clone(self);
        let guild_id = guild_id.clone();
        let channel_id = channel_id.clone();
        spawn_guarded("voice-observer", async move {
            controller
                .observe(guild_id, channel_id, session_id, origin, states, progress)
                .await;
        });
    }

    /// Dispatch loop for one transport session.
    ///
    /// A retry session that drops before Ready is left to `run_retry`, which
    /// reschedules from the failed join.
    async fn observe(
        self: Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
        session_id: SessionId,
        origin: JoinOrigin,
        mut states: mpsc::UnboundedReceiver<VoiceState>,
        progress: watch::Sender<Progress>,
    ) {
        let mut current = VoiceState::Connecting;
        let mut reached_ready = false;

        while let Some(observed) = states.recv().await {
            let step = transition(current, observed);
            if step != Transition::Ignore {
                debug!(guild = %guild_id, from = %current, to = %observed, "voice state changed");
            }
            match step {
                Transition::Ignore => {}
                Transition::Advance(next) => {
                    current = next;
                    self.registry.set_state(&guild_id, session_id, next);
                }
                Transition::Ready => {
                    current = VoiceState::Ready;
                    reached_ready = true;
                    self.registry.set_state(&guild_id, session_id, current);
                    info!(guild = %guild_id, channel = %channel_id, "voice connection ready");
                    progress.send_replace(Progress::Ready);
                }
                Transition::Dropped => {
                    current = VoiceState::Disconnected;
                    if !self.registry.set_state(&guild_id, session_id, current) {
                        break;
                    }
                    warn!(guild = %guild_id, "voice connection disconnected");

                    match await_self_heal(&mut states, self.settings.self_heal_window).await {
                        HealOutcome::Recovered(state) => {
                            current = state;
                            self.registry.set_state(&guild_id, session_id, state);
                            info!(guild = %guild_id, state = %state, "voice connection recovered");
                            self.events.publish(Event::ConnectionRecovered {
                                guild_id: guild_id.clone(),
                            });
                            if state.is_ready() {
                                reached_ready = true;
                                progress.send_replace(Progress::Ready);
                            }
                        }
                        outcome => {
                            info!(guild = %guild_id, ?outcome, "voice connection lost");
                            let reschedule = origin == JoinOrigin::Manual || reached_ready;
                            self.handle_loss(&guild_id, &channel_id, session_id, reschedule);
                            break;
                        }
                    }
                }
                Transition::Destroyed => {
                    info!(guild = %guild_id, "voice connection destroyed");
                    if self.registry.remove_session(&guild_id, session_id).is_some() {
                        self.events.publish(Event::ConnectionClosed {
                            guild_id: guild_id.clone(),
                        });
                    }
                    break;
                }
            }
        }

        progress.send_replace(Progress::Closed);
        // Stream ended without a Destroyed notification.
        self.discard_session(&guild_id, session_id);
    }

    fn handle_loss(
        self: &Arc<Self>,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        session_id: SessionId,
        reschedule: bool,
    ) {
        let Some(record) = self.registry.remove_session(guild_id, session_id) else {
            debug!(guild = %guild_id, "lost session was already replaced");
            return;
        };
        record.handle.destroy();
        self.events.publish(Event::ConnectionLost {
            guild_id: guild_id.clone(),
            channel_id: channel_id.clone(),
        });

        if !reschedule {
            return;
        }
        match self.targets.get(guild_id) {
            Some(target) => self.schedule_retry(guild_id, &target),
            None => info!(guild = %guild_id, "no target channel, not reconnecting"),
        }
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn connection_info(&self, guild_id: &GuildId) -> Option<ConnectionInfo> {
        self.registry.get(guild_id)
    }

    /// Whether the guild has a record in the Ready state.
    pub fn is_connected(&self, guild_id: &GuildId) -> bool {
        self.registry
            .state_of(guild_id)
            .is_some_and(|s| s.is_ready())
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn all_connections(&self) -> Vec<ConnectionSummary> {
        health::summarize(&self.registry.snapshot(), self.directory.as_ref(), Utc::now())
    }

    pub fn health_check(&self) -> HealthReport {
        health::health_check(&self.registry.snapshot(), self.directory.as_ref(), Utc::now())
    }

    pub fn target_channel(&self, guild_id: &GuildId) -> Option<ChannelId> {
        self.targets.get(guild_id)
    }

    pub fn reconnect_attempts(&self, guild_id: &GuildId) -> u32 {
        self.scheduler.attempts(guild_id)
    }

    pub fn has_pending_retry(&self, guild_id: &GuildId) -> bool {
        self.scheduler.has_pending(guild_id)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<dyn GuildDirectory> {
        &self.directory
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }
}
