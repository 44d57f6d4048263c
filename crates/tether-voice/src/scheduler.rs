//! # Reconnection scheduling state.
//!
//! [`ReconnectScheduler`] owns the per-guild attempt counters and the single
//! pending retry each guild may have. It never sleeps or joins by itself: the
//! controller asks it for a [`RetryPlan`], runs the deferred task, and checks
//! back in with [`ReconnectScheduler::begin_attempt`] when the timer fires.
//!
//! Every plan carries a [`CancellationToken`]. Planning again for the same
//! guild, or clearing it, cancels the previous token, so at most one retry per
//! guild is ever live.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tether_core::GuildId;
use tokio_util::sync::CancellationToken;

/// Exponential backoff bounded by an attempt budget.
///
/// Attempt `n` (0-based) waits `base × 2^n`. No jitter and no cap on the
/// delay itself; the attempt budget is the only bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(3000),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before attempt `attempt`. Saturates at [`Duration::MAX`].
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// What the scheduler decided for a guild.
#[derive(Debug)]
pub enum RetryPlan {
    Scheduled {
        /// 0-based index of the attempt that will run.
        attempt: u32,
        delay: Duration,
        ticket: u64,
        token: CancellationToken,
    },
    Exhausted {
        attempts: u32,
    },
}

#[derive(Default)]
struct GuildRetry {
    attempts: u32,
    pending: Option<PendingRetry>,
}

struct PendingRetry {
    ticket: u64,
    token: CancellationToken,
}

pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    guilds: Mutex<HashMap<GuildId, GuildRetry>>,
    next_ticket: AtomicU64,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            guilds: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn attempts(&self, guild_id: &GuildId) -> u32 {
        self.guilds
            .lock()
            .get(guild_id)
            .map(|g| g.attempts)
            .unwrap_or(0)
    }

    pub fn has_pending(&self, guild_id: &GuildId) -> bool {
        self.guilds
            .lock()
            .get(guild_id)
            .is_some_and(|g| g.pending.is_some())
    }

    /// Plan the next retry for a guild, replacing any retry already pending.
    pub fn plan(&self, guild_id: &GuildId) -> RetryPlan {
        let mut guilds = self.guilds.lock();
        let entry = guilds.entry(guild_id.clone()).or_default();

        if let Some(previous) = entry.pending.take() {
            previous.token.cancel();
        }

        if self.policy.is_exhausted(entry.attempts) {
            return RetryPlan::Exhausted {
                attempts: entry.attempts,
            };
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entry.pending = Some(PendingRetry {
            ticket,
            token: token.clone(),
        });

        RetryPlan::Scheduled {
            attempt: entry.attempts,
            delay: self.policy.delay(entry.attempts),
            ticket,
            token,
        }
    }

    /// Called when a retry timer fires. Consumes the pending slot and bumps the
    /// counter, returning the new count, or `None` if the ticket was superseded.
    pub fn begin_attempt(&self, guild_id: &GuildId, ticket: u64) -> Option<u32> {
        let mut guilds = self.guilds.lock();
        let entry = guilds.get_mut(guild_id)?;
        match entry.pending.as_ref() {
            Some(pending) if pending.ticket == ticket && !pending.token.is_cancelled() => {
                entry.pending = None;
                entry.attempts = (entry.attempts + 1).min(self.policy.max_attempts);
                Some(entry.attempts)
            }
            _ => None,
        }
    }

    /// Successful join: the counter goes back to 0.
    pub fn reset(&self, guild_id: &GuildId) {
        if let Some(entry) = self.guilds.lock().get_mut(guild_id) {
            entry.attempts = 0;
        }
    }

    /// Cancel the guild's pending retry, if any. Returns whether one was pending.
    pub fn cancel_pending(&self, guild_id: &GuildId) -> bool {
        match self
            .guilds
            .lock()
            .get_mut(guild_id)
            .and_then(|g| g.pending.take())
        {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the guild entirely: pending retry cancelled, counter dropped.
    pub fn clear(&self, guild_id: &GuildId) {
        if let Some(entry) = self.guilds.lock().remove(guild_id)
            && let Some(pending) = entry.pending
        {
            pending.token.cancel();
        }
    }

    pub fn clear_all(&self) {
        for (_, entry) in self.guilds.lock().drain() {
            if let Some(pending) = entry.pending {
                pending.token.cancel();
            }
        }
    }
}
