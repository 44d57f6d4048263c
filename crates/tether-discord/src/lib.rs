//! # tether-discord
//!
//! Discord implementations of the tether-voice collaborator traits:
//!
//! | Type                    | Implements       | Role                                   |
//! |-------------------------|------------------|----------------------------------------|
//! | `DiscordGateway`        | `GatewaySession` | websocket session, dispatch intake     |
//! | `DirectoryCache`        | `GuildDirectory` | guilds, channels, voice states, perms  |
//! | `DiscordVoiceTransport` | `VoiceTransport` | voice signalling (no media)            |
//!
//! `RestClient` sends replies and fetches channels the cache has not seen.

pub mod cache;
pub mod gateway;
pub mod permissions;
pub mod rest;
pub mod voice;

pub use cache::DirectoryCache;
pub use gateway::{DiscordGateway, GatewayEvent, GatewaySender, IncomingMessage};
pub use rest::{Embed, MessagePayload, RestClient};
pub use voice::DiscordVoiceTransport;
