//! Per-session state machine over the transport's ordered notification stream.

use std::time::Duration;
use tether_core::VoiceState;
use tokio::sync::mpsc;

/// What an observed state means for the session's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Normal progress, record the new state.
    Advance(VoiceState),
    /// The session became usable.
    Ready,
    /// The session dropped; open the self-heal window.
    Dropped,
    /// Terminal. The record goes away and counters stay as they are.
    Destroyed,
    /// Nothing changed.
    Ignore,
}

/// Decide what `observed` means given the session's `current` state.
pub fn transition(current: VoiceState, observed: VoiceState) -> Transition {
    use VoiceState::*;
    match (current, observed) {
        (Destroyed, _) => Transition::Ignore,
        (_, Destroyed) => Transition::Destroyed,
        (a, b) if a == b => Transition::Ignore,
        (_, Disconnected) => Transition::Dropped,
        (_, Ready) => Transition::Ready,
        (_, next) => Transition::Advance(next),
    }
}

/// Result of waiting out the self-heal window after a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// The transport started signalling or connecting again on its own.
    Recovered(VoiceState),
    TimedOut,
    /// The transport gave up and destroyed itself.
    Destroyed,
    /// The stream closed.
    Closed,
}

/// Wait up to `window` for the transport to re-enter `Signalling` or `Connecting`.
pub async fn await_self_heal(
    states: &mut mpsc::UnboundedReceiver<VoiceState>,
    window: Duration,
) -> HealOutcome {
    let watch = async {
        loop {
            match states.recv().await {
                Some(
                    state @ (VoiceState::Signalling | VoiceState::Connecting | VoiceState::Ready),
                ) => return HealOutcome::Recovered(state),
                Some(VoiceState::Destroyed) => return HealOutcome::Destroyed,
                Some(VoiceState::Disconnected) => continue,
                None => return HealOutcome::Closed,
            }
        }
    };
    tokio::time::timeout(window, watch)
        .await
        .unwrap_or(HealOutcome::TimedOut)
}
