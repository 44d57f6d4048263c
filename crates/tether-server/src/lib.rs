//! # tether-server
//!
//! Liveness endpoints for uptime monitors and process managers:
//!
//! - `GET /` plain "alive" probe
//! - `GET /status` process status (gateway ready flag, guilds, voice connections, memory)
//! - `GET /health` always 200 while the process serves requests
//! - `GET /api/v1/voice/health` per-guild voice connection health

use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tether_core::{Result, StatusSource, TetherError, total_memory_bytes};
use tether_voice::{HealthReport, VoiceController};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const SERVICE_NAME: &str = "discord-voice-bot";

/// Shared server state.
pub struct AppState {
    pub status: Arc<dyn StatusSource>,
    pub controller: Arc<VoiceController>,
}

#[derive(Serialize)]
struct AliveResponse {
    status: &'static str,
    service: &'static str,
    message: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
struct MemoryUsage {
    used: String,
    total: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    service: &'static str,
    uptime: u64,
    memory: MemoryUsage,
    timestamp: String,
    bot_ready: bool,
    guilds: usize,
    voice_connections: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    service: &'static str,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn megabytes(bytes: Option<u64>) -> String {
    format!("{}MB", bytes.unwrap_or(0) / 1024 / 1024)
}

/// Build the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(alive_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/voice/health", get(voice_health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn alive_handler() -> Json<AliveResponse> {
    Json(AliveResponse {
        status: "alive",
        service: SERVICE_NAME,
        message: "Bot is maintaining 24/7 voice presence",
        timestamp: now(),
    })
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.status.status();
    Json(StatusResponse {
        status: "online",
        service: SERVICE_NAME,
        uptime: status.uptime_secs,
        memory: MemoryUsage {
            used: megabytes(status.memory_bytes),
            total: megabytes(total_memory_bytes()),
        },
        timestamp: now(),
        bot_ready: status.bot_ready,
        guilds: status.guilds,
        voice_connections: status.voice_connections,
    })
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            healthy: true,
            service: SERVICE_NAME,
        }),
    )
}

async fn voice_health_handler(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    Json(state.controller.health_check())
}

/// Start the HTTP server. Runs until the listener fails or the task is dropped.
pub async fn start_server(listen: &str, state: Arc<AppState>) -> Result<()> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| TetherError::Config(format!("failed to bind {listen}: {e}")))?;
    info!(listen = %listen, "keep-alive server running");

    axum::serve(listener, router)
        .await
        .map_err(|e| TetherError::Other(e.into()))?;

    Ok(())
}
