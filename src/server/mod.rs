//! HTTP/WebSocket transport: the axum `Router` that exposes `/ws` and the
//! operability endpoints (spec.md §6, SPEC_FULL.md "Ambient stack").

pub mod http;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;

use crate::adapters::{AsrAdapter, LlmAdapter, TtsAdapter};
use crate::config::ServerConfig;
use crate::session::SessionRegistry;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<SessionRegistry>,
    pub asr: Arc<dyn AsrAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub tts: Arc<dyn TtsAdapter>,
}

/// Build the full router: `/ws` for the per-connection dialogue channel,
/// plus the ambient operability surface under `/healthz` and `/sessions`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::upgrade_handler))
        .route("/healthz", get(http::healthz))
        .route("/sessions", get(http::session_count))
        .with_state(state)
}

/// Spawn the idle-session reaper as a background task. Intended to be
/// called once, alongside `axum::serve`.
pub fn spawn_reaper(registry: Arc<SessionRegistry>, config: &ServerConfig) -> tokio::task::JoinHandle<()> {
    let idle_timeout = Duration::from_secs(config.session.timeouts.idle_session_s);
    let check_interval = Duration::from_secs(30);
    tokio::spawn(registry.run_reaper(idle_timeout, check_interval))
}
