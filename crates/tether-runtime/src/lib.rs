//! # tether-runtime
//!
//! The presence runtime. It owns the Discord collaborators and routes what
//! the gateway delivers:
//!
//! ```text
//!        Discord gateway ──► GatewayEvent
//!                               │
//!          ┌────────────────────┼─────────────────────┐
//!          ▼                    ▼                     ▼
//!    text commands        own voice state      session lost
//!   (join/leave/...)     (moved / kicked)          │
//!          │                    │                  ▼
//!          └──────► VoiceController        SessionSupervisor
//!                        │
//!                        ▼
//!                    EventBus ──► operator notices
//! ```

pub mod commands;
pub mod format;
pub mod runtime;
pub mod signals;

pub use commands::{Command, CommandContext, Reply};
pub use runtime::{PresenceRuntime, RuntimeStatus, apply_own_voice_state};
pub use signals::wait_for_shutdown_signal;
