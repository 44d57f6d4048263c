//! # tether-voice
//!
//! Keeps the agent present in one voice channel per guild. The
//! [`VoiceController`] drives join, leave and reconnection; the
//! [`SessionSupervisor`] keeps the upstream gateway session alive.

pub mod controller;
pub mod guard;
pub mod health;
pub mod machine;
pub mod mock;
pub mod registry;
pub mod scheduler;
pub mod supervisor;
pub mod target;
pub mod transport;

pub use controller::{ControllerSettings, VoiceController};
pub use guard::spawn_guarded;
pub use health::{ConnectionHealth, ConnectionSummary, HealthReport, UNKNOWN_GUILD};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use scheduler::{BackoffPolicy, ReconnectScheduler, RetryPlan};
pub use supervisor::{SessionSupervisor, SupervisorSettings};
pub use target::TargetChannels;
pub use transport::{
    GatewaySession, GuildDirectory, JoinOptions, TransportHandle, TransportSession, VoiceTransport,
};
