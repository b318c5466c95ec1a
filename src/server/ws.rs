//! The `/ws` handler: upgrades a connection, spawns a session, and bridges
//! the axum socket to the orchestrator (spec.md §4.1, §4.5).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::orchestrator::{spawn_session, InboundMessage};
use crate::pipeline::scheduler::OutboundSink;
use crate::wire::ServerFrame;

use super::AppState;

pub async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Writes outbound items onto a split axum `WebSocket` sink: `ServerFrame`s
/// as JSON text, PCM chunks as binary messages.
struct WebSocketSink {
    sender: futures_util::stream::SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl OutboundSink for WebSocketSink {
    async fn write_text(&mut self, frame: ServerFrame) -> Result<()> {
        let json = serde_json::to_string(&frame)
            .map_err(|e| crate::error::OrchestratorError::Channel(e.to_string()))?;
        self.send(Message::Text(json.into())).await
    }

    async fn write_pcm(&mut self, pcm: Vec<u8>) -> Result<()> {
        self.send(Message::Binary(pcm.into())).await
    }
}

impl WebSocketSink {
    async fn send(&mut self, message: Message) -> Result<()> {
        use futures_util::SinkExt;
        self.sender
            .send(message)
            .await
            .map_err(|e| crate::error::OrchestratorError::Channel(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    use futures_util::StreamExt;

    let session_id = Uuid::new_v4();
    info!(%session_id, "websocket connected");

    let (sender, mut receiver) = socket.split();
    let sink: Box<dyn OutboundSink> = Box::new(WebSocketSink { sender });

    let (runtime, tasks) = spawn_session(
        session_id,
        state.config.session.clone(),
        state.asr.clone(),
        state.llm.clone(),
        state.tts.clone(),
        sink,
    );

    state
        .registry
        .insert_handle(session_id, runtime.session().clone())
        .await;

    loop {
        let cancelled = runtime.session().lock().await.cancellation.clone();
        let message = tokio::select! {
            _ = cancelled.cancelled() => {
                info!(%session_id, "session cancelled (idle reaper or teardown), closing socket");
                break;
            }
            message = receiver.next() => message,
        };
        let Some(message) = message else { break };

        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(%session_id, error = %err, "websocket read error");
                break;
            }
        };

        let inbound = match message {
            Message::Text(text) => InboundMessage::Text(text.to_string()),
            Message::Binary(bytes) => InboundMessage::Binary(bytes.into()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Err(err) = runtime.on_inbound(inbound).await {
            warn!(%session_id, error = %err, "dropping session after inbound handling error");
            break;
        }
    }

    info!(%session_id, "websocket disconnected, tearing down session");
    runtime.session().lock().await.cancellation.cancel();
    state.registry.remove(session_id).await;
    tasks.turn_actor.abort();
    tasks.outbound_scheduler.abort();
    tasks.asr_events.abort();
}
