//! Session orchestrator: wires the inbound demux, ASR event task, outbound
//! scheduler, and turn actor into one running session (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{AsrAdapter, AsrSession, LlmAdapter, TtsAdapter};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::pipeline::gate::BargeInGate;
use crate::pipeline::scheduler::{self, OutboundItem, OutboundScheduler, OutboundSender, OutboundSink};
use crate::pipeline::state_machine::{TurnActor, TurnEvent};
use crate::runtime::RuntimeEvent;
use crate::session::types::{EpochGate, Session, TurnPhase};
use crate::wire::{self, ClientCommand, ServerFrame};

/// One message arriving from the client channel, already demultiplexed by
/// frame kind but not yet parsed.
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Everything the transport layer (e.g. the axum WebSocket handler) needs to
/// drive one session: feed it inbound messages and await its completion.
pub struct SessionRuntime {
    session: Arc<Mutex<Session>>,
    outbound: OutboundSender,
    mailbox: mpsc::Sender<TurnEvent>,
    asr: Arc<dyn AsrAdapter>,
    asr_session: Mutex<Option<Box<dyn AsrSession>>>,
    gate: Mutex<BargeInGate>,
    epoch_gate: EpochGate,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
}

/// Handles for the background tasks spawned alongside a [`SessionRuntime`].
/// Dropping (or awaiting) these after teardown ensures no task leaks past
/// its session.
pub struct SessionTasks {
    pub turn_actor: tokio::task::JoinHandle<()>,
    pub outbound_scheduler: tokio::task::JoinHandle<Result<()>>,
    pub asr_events: tokio::task::JoinHandle<()>,
}

/// Build and spawn a new session's full task set (spec.md §4.5's four
/// long-running/transient tasks, minus the inbound demux, which the
/// transport-specific read loop drives directly via [`SessionRuntime::on_inbound`]).
pub fn spawn_session(
    session_id: Uuid,
    config: SessionConfig,
    asr: Arc<dyn AsrAdapter>,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    sink: Box<dyn OutboundSink>,
) -> (Arc<SessionRuntime>, SessionTasks) {
    let new_session = Session::new(session_id);
    let epoch_gate = new_session.epoch_gate();
    let drop_counter = new_session.drop_counter();
    let session = Arc::new(Mutex::new(new_session));
    let (outbound, scheduler) = scheduler::channel(
        config.channels.outbound,
        epoch_gate.clone(),
        Duration::from_millis(config.timeouts.outbound_pcm_block_ms),
        drop_counter,
    );

    let runtime_tx = crate::runtime::channel();

    let (actor, mailbox) = TurnActor::new(
        session_id,
        session.clone(),
        outbound.clone(),
        llm,
        tts,
        config.clone(),
        runtime_tx.clone(),
    );

    let gate = BargeInGate::new(&config.barge_in);

    let runtime = Arc::new(SessionRuntime {
        session,
        outbound,
        mailbox,
        asr,
        asr_session: Mutex::new(None),
        gate: Mutex::new(gate),
        epoch_gate,
        runtime_tx,
    });

    let turn_actor = tokio::spawn(actor.run());
    let outbound_scheduler = tokio::spawn(run_scheduler(scheduler, sink));
    let asr_events = tokio::spawn(run_asr_event_loop(runtime.clone()));

    (runtime, SessionTasks {
        turn_actor,
        outbound_scheduler,
        asr_events,
    })
}

async fn run_scheduler(scheduler: OutboundScheduler, mut sink: Box<dyn OutboundSink>) -> Result<()> {
    scheduler.run(sink.as_mut()).await
}

/// Continuously drains whichever ASR session is currently open, forwarding
/// its events to the turn actor. Survives across utterance boundaries: when
/// no session is open it simply waits to be polled again.
async fn run_asr_event_loop(runtime: Arc<SessionRuntime>) {
    loop {
        let cancelled = runtime.session.lock().await.cancellation.clone();
        tokio::select! {
            _ = cancelled.cancelled() => return,
            () = runtime.poll_asr_once() => {}
        }
    }
}

impl SessionRuntime {
    async fn poll_asr_once(&self) {
        let event = {
            let guard = self.asr_session.lock().await;
            match guard.as_ref() {
                Some(session) => session.next_event().await,
                None => {
                    drop(guard);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    return;
                }
            }
        };

        match event {
            Ok(Some(transcript)) => {
                let turn_event = match transcript {
                    crate::pipeline::messages::Transcript::Partial { turn_id, text } => {
                        TurnEvent::AsrPartial { turn_id, text }
                    }
                    crate::pipeline::messages::Transcript::Final { turn_id, text } => {
                        TurnEvent::AsrFinal { turn_id, text }
                    }
                };
                if self.mailbox.send(turn_event).await.is_err() {
                    warn!("turn actor mailbox closed while forwarding ASR event");
                }
            }
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(err) => {
                let _ = self
                    .mailbox
                    .send(TurnEvent::AsrError {
                        turn_id: 0,
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Entry point for the transport's read loop: demultiplex one inbound
    /// message (spec.md §4.1, §4.5 "Inbound demux task").
    pub async fn on_inbound(&self, message: InboundMessage) -> Result<()> {
        match message {
            InboundMessage::Text(text) => self.on_text(&text).await,
            InboundMessage::Binary(bytes) => self.on_binary(&bytes).await,
        }
    }

    async fn on_text(&self, text: &str) -> Result<()> {
        let session_id = self.session.lock().await.session_id.to_string();
        let command: ClientCommand = match serde_json::from_str(text) {
            Ok(cmd) => cmd,
            Err(err) => {
                self.outbound
                    .send_session(OutboundItem::Text(ServerFrame::error(
                        session_id,
                        None,
                        format!("malformed command frame: {err}"),
                    )))
                    .await?;
                return Ok(());
            }
        };

        if matches!(command, ClientCommand::Start) {
            self.open_asr_for_new_utterance().await?;
        }
        if matches!(command, ClientCommand::Interrupt) {
            self.gate.lock().await.reset();
        }

        self.mailbox
            .send(TurnEvent::ClientCommand(command))
            .await
            .map_err(|_| crate::error::OrchestratorError::Channel("turn actor mailbox closed".into()))
    }

    async fn on_binary(&self, bytes: &[u8]) -> Result<()> {
        let frame = match wire::decode_inbound_audio(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                let session = self.session.lock().await;
                session
                    .malformed_frames
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let session_id = session.session_id.to_string();
                drop(session);
                self.outbound
                    .send_session(OutboundItem::Text(ServerFrame::error(
                        session_id,
                        None,
                        format!("malformed audio frame: {err}"),
                    )))
                    .await?;
                return Ok(());
            }
        };

        {
            let guard = self.asr_session.lock().await;
            if let Some(asr_session) = guard.as_ref() {
                asr_session.feed(&frame.pcm).await?;
            }
        }

        let phase = self.session.lock().await.phase;
        if matches!(phase, TurnPhase::Thinking | TurnPhase::Speaking) {
            let fired = self.gate.lock().await.observe(&frame);
            if fired {
                info!("barge-in gate fired");
                let _ = self.mailbox.send(TurnEvent::BargeIn).await;
            }
        }
        Ok(())
    }

    async fn open_asr_for_new_utterance(&self) -> Result<()> {
        let turn_id = self.session.lock().await.begin_listening();
        let new_session = self.asr.open(turn_id).await?;
        let mut guard = self.asr_session.lock().await;
        if let Some(old) = guard.take() {
            let _ = old.close().await;
        }
        *guard = Some(new_session);
        Ok(())
    }

    pub fn epoch_gate(&self) -> &EpochGate {
        &self.epoch_gate
    }

    pub fn session(&self) -> &Arc<Mutex<Session>> {
        &self.session
    }

    /// Subscribe to this session's runtime event bus (observability, not
    /// part of the wire protocol).
    pub fn subscribe_runtime_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }
}
