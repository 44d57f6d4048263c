//! Gateway session supervision.
//!
//! Polls the gateway on a fixed interval, logs a periodic status line, and
//! re-logins when the session is gone. Voice connections are not touched here;
//! their own observers handle voice-level loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tether_config::TetherConfig;
use tether_core::{Event, EventBus, StatusSource};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::transport::GatewaySession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub check_interval: Duration,
    pub status_interval: Duration,
    pub redial_delay: Duration,
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            status_interval: Duration::from_secs(60),
            redial_delay: Duration::from_secs(5),
            retry_delay: Duration::from_secs(30),
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            check_interval: config.supervisor.check_interval(),
            status_interval: config.supervisor.status_interval(),
            redial_delay: config.supervisor.redial_delay(),
            retry_delay: config.supervisor.retry_delay(),
        }
    }
}

pub struct SessionSupervisor {
    gateway: Arc<dyn GatewaySession>,
    status: Option<Arc<dyn StatusSource>>,
    settings: SupervisorSettings,
    events: EventBus,
    lost: Notify,
    relogins: AtomicU64,
}

impl SessionSupervisor {
    pub fn new(
        gateway: Arc<dyn GatewaySession>,
        settings: SupervisorSettings,
        events: EventBus,
    ) -> Self {
        Self {
            gateway,
            status: None,
            settings,
            events,
            lost: Notify::new(),
            relogins: AtomicU64::new(0),
        }
    }

    /// Attach a source for the periodic status line.
    pub fn with_status(mut self, status: Arc<dyn StatusSource>) -> Self {
        self.status = Some(status);
        self
    }

    /// Wake the supervisor right away instead of waiting for the next check.
    pub fn notify_session_lost(&self) {
        self.lost.notify_one();
    }

    /// Successful re-logins since start.
    pub fn relogin_count(&self) -> u64 {
        self.relogins.load(Ordering::Relaxed)
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let start = Instant::now();
        let mut checks = interval_at(start + self.settings.check_interval, self.settings.check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reports = interval_at(start + self.settings.status_interval, self.settings.status_interval);
        reports.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            check_secs = self.settings.check_interval.as_secs(),
            status_secs = self.settings.status_interval.as_secs(),
            "session supervisor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = checks.tick() => {
                    if !self.gateway.is_ready() {
                        warn!("gateway session not ready, attempting to reconnect");
                        self.recover(&shutdown).await;
                    }
                }
                _ = reports.tick() => {
                    self.log_status();
                    if !self.gateway.is_ready() {
                        self.recover(&shutdown).await;
                    }
                }
                _ = self.lost.notified() => self.recover(&shutdown).await,
            }
        }

        info!("session supervisor stopped");
    }

    fn log_status(&self) {
        let Some(source) = &self.status else {
            return;
        };
        let status = source.status();
        let memory = status
            .memory_mb()
            .map(|mb| format!("{mb}MB"))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            guilds = status.guilds,
            voice_connections = status.voice_connections,
            memory = %memory,
            uptime_secs = status.uptime_secs,
            "Health Check - Guilds: {}, Voice Connections: {}, Memory: {}",
            status.guilds,
            status.voice_connections,
            memory
        );
    }

    /// Re-login until the session is back or shutdown fires.
    async fn recover(&self, shutdown: &CancellationToken) {
        if self.gateway.is_ready() {
            return;
        }
        self.events.publish(Event::GatewayLost);
        if !pause(shutdown, self.settings.redial_delay).await {
            return;
        }

        loop {
            if self.gateway.is_ready() {
                return;
            }
            if let Err(e) = self.gateway.destroy().await {
                warn!(error = %e, "failed to tear down stale gateway session");
            }
            match self.gateway.login().await {
                Ok(()) => {
                    let total = self.relogins.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(relogins = total, "gateway session re-established");
                    self.events.publish(Event::GatewayRecovered);
                    return;
                }
                Err(e) => {
                    error!(error = %e, retry_secs = self.settings.retry_delay.as_secs(), "reconnection failed");
                    if !pause(shutdown, self.settings.retry_delay).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Sleep unless shutdown fires first. Returns false on shutdown.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
