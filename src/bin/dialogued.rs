//! `dialogued`: serves the dialogue orchestrator over WebSocket.
//!
//! This binary is thin by design: it parses flags, loads config, builds the
//! adapter set, and wires everything into the axum router. All testable
//! logic lives in the library.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use orchestrator::adapters::{MockAsrAdapter, MockLlmAdapter, MockTtsAdapter};
use orchestrator::config::{parse_toml, ServerConfig};
use orchestrator::server::{build_router, spawn_reaper, AppState};
use orchestrator::SessionRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Real-time speech-to-speech dialogue orchestrator.
#[derive(Parser)]
#[command(name = "dialogued", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Missing sections fall back to
    /// defaults.
    #[arg(short, long, env = "DIALOGUED_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(short, long, env = "DIALOGUED_BIND")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orchestrator=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)?;
            parse_toml(&source)?
        }
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    // The demo adapters are deterministic stand-ins for real ASR/LLM/TTS
    // backends; a production deployment supplies its own `AsrAdapter`/
    // `LlmAdapter`/`TtsAdapter` implementations to `AppState`.
    let asr = Arc::new(MockAsrAdapter::new(Vec::new()));
    let llm = Arc::new(MockLlmAdapter::new(Vec::new()));
    let tts = Arc::new(MockTtsAdapter::new(Vec::new()));

    let registry = Arc::new(SessionRegistry::new());
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: registry.clone(),
        asr,
        llm,
        tts,
    };

    let _reaper = spawn_reaper(registry, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "dialogued listening");
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}
