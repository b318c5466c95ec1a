//! Turn state machine: the single authoritative mailbox for one session's
//! mutable state (spec.md §4.4). All other tasks communicate with it by
//! posting `TurnEvent`s; only this actor ever mutates `Session`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{LlmAdapter, TtsAdapter};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::pipeline::scheduler::{OutboundItem, OutboundSender};
use crate::pipeline::segmenter::Segmenter;
use crate::runtime::RuntimeEvent;
use crate::session::types::{ChatMessage, ChatRole, Session, TurnPhase};
use crate::wire::{ClientCommand, ServerFrame, StatusKind};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events posted to the turn actor's mailbox. Each carries enough context
/// for the actor to decide whether it is still relevant (e.g. `epoch`).
pub enum TurnEvent {
    ClientCommand(ClientCommand),
    AsrPartial { turn_id: u64, text: String },
    AsrFinal { turn_id: u64, text: String },
    AsrError { turn_id: u64, message: String },
    BargeIn,
    /// Emitted by the turn task once the LLM/segmenter/TTS pipeline for
    /// `turn_id`/`epoch` has fully drained (LLM done and all segments
    /// spoken, spec.md §4.4's SPEAKING→IDLE transition).
    TurnCompleted { turn_id: u64, epoch: u64 },
    TurnFailed { turn_id: u64, epoch: u64, message: String },
}

/// Single-owner actor for one session's `TurnPhase`/`TurnContext`/history.
pub struct TurnActor {
    session_id: Uuid,
    session: Arc<Mutex<Session>>,
    outbound: OutboundSender,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    config: SessionConfig,
    mailbox: mpsc::Receiver<TurnEvent>,
    /// A clone of the mailbox's own sender, handed to each turn task so it
    /// can post its completion/failure back onto this actor's mailbox.
    self_tx: mpsc::Sender<TurnEvent>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
}

/// Mailbox capacity for a session's turn actor. Generous relative to the
/// other pipeline queues since every kind of session event funnels through
/// this one mailbox (spec.md §5 "single authoritative mailbox").
const MAILBOX_CAPACITY: usize = 32;

impl TurnActor {
    /// Build a new actor together with the sender half callers use to post
    /// events to it (client commands, ASR events, barge-in signals).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Uuid,
        session: Arc<Mutex<Session>>,
        outbound: OutboundSender,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<dyn TtsAdapter>,
        config: SessionConfig,
        runtime_tx: broadcast::Sender<RuntimeEvent>,
    ) -> (Self, mpsc::Sender<TurnEvent>) {
        let (self_tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = Self {
            session_id,
            session,
            outbound,
            llm,
            tts,
            config,
            mailbox,
            self_tx: self_tx.clone(),
            runtime_tx,
        };
        (actor, self_tx)
    }

    /// Broadcast a phase change, ignoring the error when no subscriber is
    /// currently listening.
    fn emit_phase(&self, turn_id: Option<u64>, phase: TurnPhase) {
        let _ = self.runtime_tx.send(RuntimeEvent::PhaseChanged {
            session_id: self.session_id,
            turn_id,
            phase,
        });
    }

    /// Drain the mailbox until it closes (session teardown).
    pub async fn run(mut self) {
        while let Some(event) = self.mailbox.recv().await {
            if let Err(err) = self.handle(event).await {
                warn!(error = %err, "turn actor event handling failed");
            }
        }
    }

    async fn session_id_string(&self) -> String {
        self.session.lock().await.session_id.to_string()
    }

    async fn handle(&mut self, event: TurnEvent) -> Result<()> {
        match event {
            TurnEvent::ClientCommand(cmd) => self.handle_client_command(cmd).await,
            TurnEvent::AsrPartial { turn_id, text } => self.handle_asr_partial(turn_id, text).await,
            TurnEvent::AsrFinal { turn_id, text } => self.handle_asr_final(turn_id, text).await,
            TurnEvent::AsrError { turn_id, message } => {
                self.handle_asr_error(turn_id, message).await
            }
            TurnEvent::BargeIn => self.interrupt("barge-in detected").await,
            TurnEvent::TurnCompleted { turn_id, epoch } => {
                self.handle_turn_completed(turn_id, epoch).await
            }
            TurnEvent::TurnFailed {
                turn_id,
                epoch,
                message,
            } => self.handle_turn_failed(turn_id, epoch, message).await,
        }
    }

    async fn handle_client_command(&mut self, cmd: ClientCommand) -> Result<()> {
        let session_id = self.session_id_string().await;
        match cmd {
            ClientCommand::Start => {
                let mut session = self.session.lock().await;
                session.phase = TurnPhase::Listening;
                session.touch();
                drop(session);
                self.emit_phase(None, TurnPhase::Listening);
                self.outbound
                    .send_session(OutboundItem::Text(ServerFrame::status(
                        session_id,
                        StatusKind::Listening,
                    )))
                    .await
            }
            ClientCommand::Stop => {
                let mut session = self.session.lock().await;
                session.cancel_turn();
                session.phase = TurnPhase::Idle;
                session.touch();
                drop(session);
                self.emit_phase(None, TurnPhase::Idle);
                self.outbound
                    .send_session(OutboundItem::Text(ServerFrame::StopAcknowledged {
                        session_id: session_id.clone(),
                        queues_cleared: true,
                    }))
                    .await?;
                self.outbound
                    .send_session(OutboundItem::Text(ServerFrame::status(
                        session_id,
                        StatusKind::Stopped,
                    )))
                    .await
            }
            ClientCommand::Reset => {
                let mut session = self.session.lock().await;
                session.cancel_turn();
                session.history.clear();
                session.phase = TurnPhase::Idle;
                session.touch();
                drop(session);
                self.emit_phase(None, TurnPhase::Idle);
                Ok(())
            }
            ClientCommand::Interrupt => self.interrupt("client interrupt").await,
            ClientCommand::ClearQueues => Ok(()),
        }
    }

    async fn handle_asr_partial(&mut self, turn_id: u64, text: String) -> Result<()> {
        let session_id = self.session_id_string().await;
        self.session.lock().await.touch();
        let _ = self.runtime_tx.send(RuntimeEvent::Transcript {
            session_id: self.session_id,
            transcript: crate::pipeline::messages::Transcript::Partial {
                turn_id,
                text: text.clone(),
            },
        });
        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::PartialTranscript {
                session_id,
                turn_id,
                content: text,
            }))
            .await
    }

    async fn handle_asr_final(&mut self, turn_id: u64, text: String) -> Result<()> {
        let session_id = self.session_id_string().await;
        {
            let mut session = self.session.lock().await;
            if matches!(session.phase, TurnPhase::Thinking | TurnPhase::Speaking) {
                // ASR reported Final while we're mid-response: treat as
                // barge-in input (spec.md §4.2).
                session.touch();
                drop(session);
                self.interrupt_for_final(turn_id, text).await?;
                return Ok(());
            }
            session.phase = TurnPhase::Transcribed;
            session.touch();
        }
        self.emit_phase(Some(turn_id), TurnPhase::Transcribed);
        let _ = self.runtime_tx.send(RuntimeEvent::Transcript {
            session_id: self.session_id,
            transcript: crate::pipeline::messages::Transcript::Final {
                turn_id,
                text: text.clone(),
            },
        });
        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::FinalTranscript {
                session_id,
                turn_id,
                content: text.clone(),
            }))
            .await?;
        self.begin_turn(text).await
    }

    async fn interrupt_for_final(&mut self, _turn_id: u64, text: String) -> Result<()> {
        self.interrupt("server-detected barge-in (ASR final during playback)")
            .await?;
        self.begin_turn(text).await
    }

    async fn handle_asr_error(&mut self, _turn_id: u64, message: String) -> Result<()> {
        let session_id = self.session_id_string().await;
        let mut session = self.session.lock().await;
        session.cancel_turn();
        session.phase = TurnPhase::Idle;
        drop(session);
        self.emit_phase(None, TurnPhase::Idle);
        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::error(
                session_id, None, message,
            )))
            .await
    }

    /// Enter THINKING: install a new TurnContext, cancelling any prior one,
    /// and spawn the turn task that drives LLM → segmenter → TTS.
    async fn begin_turn(&mut self, user_text: String) -> Result<()> {
        let session_id = self.session_id_string().await;
        let (turn_id, epoch, history, cancellation) = {
            let mut session = self.session.lock().await;
            session.cancel_turn();
            let turn_id = session.start_turn(user_text.clone());
            let epoch = session.turn.as_ref().expect("just started").epoch;
            let cancellation = session
                .turn
                .as_ref()
                .expect("just started")
                .cancellation
                .clone();
            session.phase = TurnPhase::Thinking;
            let history = session.history.clone();
            (turn_id, epoch, history, cancellation)
        };
        self.emit_phase(Some(turn_id), TurnPhase::Thinking);

        self.outbound
            .send_turn(
                epoch,
                OutboundItem::Text(ServerFrame::llm_status_processing(
                    session_id.clone(),
                    turn_id,
                )),
            )
            .await?;

        let task = TurnTask {
            session: self.session.clone(),
            outbound: self.outbound.clone(),
            llm: self.llm.clone(),
            tts: self.tts.clone(),
            config: self.config.clone(),
            session_id: self.session_id,
            session_id_string: session_id,
            turn_id,
            epoch,
            user_text,
            history,
            cancellation,
            completion_tx: self.self_tx.clone(),
            runtime_tx: self.runtime_tx.clone(),
        };
        tokio::spawn(task.run());
        Ok(())
    }

    async fn interrupt(&mut self, reason: &str) -> Result<()> {
        let session_id = self.session_id_string().await;
        let (turn_id, was_active) = {
            let mut session = self.session.lock().await;
            let turn_id = session.turn.as_ref().map(|t| t.turn_id);
            let was_active = session.turn.is_some();
            session.cancel_turn();
            session.phase = TurnPhase::Interrupted;
            session.touch();
            (turn_id, was_active)
        };

        self.emit_phase(turn_id, TurnPhase::Interrupted);
        if was_active {
            info!(reason, "interrupting active turn");
            let _ = self.runtime_tx.send(RuntimeEvent::BargeIn {
                session_id: self.session_id,
                turn_id,
            });
            self.outbound
                .send_session(OutboundItem::Text(ServerFrame::TtsStop {
                    session_id: session_id.clone(),
                    turn_id: turn_id.unwrap_or_default(),
                }))
                .await?;
        }

        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::InterruptAcknowledged {
                session_id: session_id.clone(),
                turn_id,
            }))
            .await?;

        let mut session = self.session.lock().await;
        session.phase = TurnPhase::Listening;
        drop(session);
        self.emit_phase(turn_id, TurnPhase::Listening);
        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::status(
                session_id,
                StatusKind::Listening,
            )))
            .await
    }

    async fn handle_turn_completed(&mut self, turn_id: u64, epoch: u64) -> Result<()> {
        let session_id = self.session_id_string().await;
        let mut session = self.session.lock().await;
        let Some(active) = session.turn.as_ref() else {
            return Ok(());
        };
        if active.turn_id != turn_id || active.epoch != epoch {
            return Ok(());
        }
        let assistant_text = active.assistant_buffer.clone();
        let user_text = active.user_text.clone();
        session.history.push(ChatMessage {
            role: ChatRole::User,
            text: user_text,
        });
        session.history.push(ChatMessage {
            role: ChatRole::Assistant,
            text: assistant_text.clone(),
        });
        session.turn = None;
        session.phase = TurnPhase::Idle;
        drop(session);
        self.emit_phase(Some(turn_id), TurnPhase::Idle);

        self.outbound
            .send_turn(
                epoch,
                OutboundItem::Text(ServerFrame::LlmResponse {
                    session_id,
                    turn_id,
                    content: assistant_text,
                    is_complete: true,
                }),
            )
            .await
    }

    async fn handle_turn_failed(&mut self, turn_id: u64, epoch: u64, message: String) -> Result<()> {
        let session_id = self.session_id_string().await;
        let mut session = self.session.lock().await;
        if let Some(active) = session.turn.as_ref() {
            if active.turn_id == turn_id && active.epoch == epoch {
                session.turn = None;
                session.phase = TurnPhase::Listening;
            }
        }
        drop(session);
        self.emit_phase(Some(turn_id), TurnPhase::Listening);
        let _ = self.runtime_tx.send(RuntimeEvent::TurnFailed {
            session_id: self.session_id,
            turn_id,
            message: message.clone(),
        });
        self.outbound
            .send_session(OutboundItem::Text(ServerFrame::error(
                session_id,
                Some(turn_id),
                message,
            )))
            .await
    }
}

/// Transient per-turn task: drives LLM generation, sentence segmentation,
/// and TTS synthesis, reporting completion/failure back to the turn actor's
/// mailbox (spec.md §4.5 "Turn task").
struct TurnTask {
    session: Arc<Mutex<Session>>,
    outbound: OutboundSender,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<dyn TtsAdapter>,
    config: SessionConfig,
    session_id: Uuid,
    session_id_string: String,
    turn_id: u64,
    epoch: u64,
    user_text: String,
    history: Vec<ChatMessage>,
    cancellation: CancellationToken,
    completion_tx: mpsc::Sender<TurnEvent>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
}

impl TurnTask {
    async fn run(self) {
        let turn_overall = Duration::from_millis(self.config.timeouts.turn_overall_ms);
        let turn_id = self.turn_id;
        let epoch = self.epoch;
        let event = match timeout(turn_overall, self.drive()).await {
            Ok(Ok(())) => TurnEvent::TurnCompleted { turn_id, epoch },
            Ok(Err(err)) => TurnEvent::TurnFailed {
                turn_id,
                epoch,
                message: err.to_string(),
            },
            Err(_) => {
                warn!(turn_id, "turn exceeded its overall deadline, cancelling");
                self.cancellation.cancel();
                TurnEvent::TurnFailed {
                    turn_id,
                    epoch,
                    message: "turn exceeded overall deadline".into(),
                }
            }
        };
        let _ = self.completion_tx.send(event).await;
    }

    /// Drives LLM generation and sentence segmentation. Synthesis of each
    /// completed segment is handed off to a dedicated [`TtsWorker`] task so a
    /// slow or failing segment never blocks the next token from being pulled
    /// (spec.md §4.4: token mirroring and audio streaming run in parallel).
    async fn drive(&self) -> Result<()> {
        let stream = self
            .llm
            .generate(&self.user_text, &self.history, self.cancellation.clone())
            .await?;

        let first_token = timeout(
            Duration::from_millis(self.config.timeouts.llm_first_token_ms),
            stream.next_fragment(),
        )
        .await
        .map_err(|_| crate::error::OrchestratorError::LlmAdapter("first token timeout".into()))??;

        let mut segmenter = Segmenter::new(
            self.turn_id,
            self.epoch,
            self.config.segmenter.max_segment_chars,
        );
        let mut buffer = String::new();

        let (segment_tx, segment_rx) = mpsc::channel(SEGMENT_QUEUE_CAPACITY);
        let worker = TtsWorker {
            session: self.session.clone(),
            outbound: self.outbound.clone(),
            tts: self.tts.clone(),
            config: self.config.clone(),
            session_id: self.session_id,
            session_id_string: self.session_id_string.clone(),
            turn_id: self.turn_id,
            epoch: self.epoch,
            cancellation: self.cancellation.clone(),
            runtime_tx: self.runtime_tx.clone(),
        };
        let worker_handle = tokio::spawn(worker.run(segment_rx));

        let mut pending = first_token;
        let mut cancelled = false;
        loop {
            if self.cancellation.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(fragment) = pending else { break };
            buffer.push_str(&fragment);
            self.mirror_token(&fragment, &buffer, false).await?;

            for segment in segmenter.push(&fragment) {
                if segment_tx.send(segment).await.is_err() {
                    break;
                }
            }

            pending = stream.next_fragment().await?;
        }

        if !cancelled {
            if let Some(tail) = segmenter.finish() {
                let _ = segment_tx.send(tail).await;
            }
        }
        drop(segment_tx);
        self.set_assistant_buffer(buffer).await;

        let outcome = worker_handle
            .await
            .map_err(|e| crate::error::OrchestratorError::TtsAdapter(format!("tts worker task panicked: {e}")))?;

        if cancelled {
            return Ok(());
        }

        if outcome.speaking_started && !outcome.any_segment_succeeded {
            return Err(crate::error::OrchestratorError::TtsAdapter(
                "all speech segments failed to synthesize".into(),
            ));
        }

        Ok(())
    }

    async fn mirror_token(&self, fragment: &str, accumulated: &str, is_complete: bool) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if let Some(active) = session.turn.as_mut() {
                if active.turn_id == self.turn_id && active.epoch == self.epoch {
                    active.assistant_buffer = accumulated.to_string();
                }
            }
        }
        let _ = self.runtime_tx.send(RuntimeEvent::AssistantToken {
            session_id: self.session_id,
            token: crate::pipeline::messages::AssistantToken {
                turn_id: self.turn_id,
                epoch: self.epoch,
                fragment: fragment.to_string(),
                is_complete,
            },
        });
        self.outbound
            .send_turn(
                self.epoch,
                OutboundItem::Text(ServerFrame::LlmResponse {
                    session_id: self.session_id_string.clone(),
                    turn_id: self.turn_id,
                    content: accumulated.to_string(),
                    is_complete,
                }),
            )
            .await
    }

    async fn set_assistant_buffer(&self, text: String) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.turn.as_mut() {
            if active.turn_id == self.turn_id && active.epoch == self.epoch {
                active.assistant_buffer = text;
            }
        }
    }
}

/// Queue capacity between the turn task's segmenter and its [`TtsWorker`].
/// Bounded so a backlog of unspoken segments exerts backpressure on the LLM
/// loop rather than growing without limit, while still letting token
/// generation run ahead of audio synthesis (spec.md §4.4).
const SEGMENT_QUEUE_CAPACITY: usize = 8;

/// What happened once a [`TtsWorker`]'s segment queue closed: whether speech
/// was attempted at all, and whether any attempt actually produced audio.
/// `drive` uses this to decide between a normal completion and an `error`
/// (spec.md §4.9: "TTS adapter error mid-segment: ... continue with next
/// segment if any; if all segments fail, send error").
struct TtsWorkerOutcome {
    speaking_started: bool,
    any_segment_succeeded: bool,
}

/// Synthesizes and streams a turn's sentence segments independently of the
/// LLM token loop, so a slow or failing segment's synthesis never blocks the
/// next token from being pulled (spec.md §4.4).
struct TtsWorker {
    session: Arc<Mutex<Session>>,
    outbound: OutboundSender,
    tts: Arc<dyn TtsAdapter>,
    config: SessionConfig,
    session_id: Uuid,
    session_id_string: String,
    turn_id: u64,
    epoch: u64,
    cancellation: CancellationToken,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
}

impl TtsWorker {
    async fn run(self, mut segments: mpsc::Receiver<crate::pipeline::messages::SpeechSegment>) -> TtsWorkerOutcome {
        let mut speaking_started = false;
        let mut any_segment_succeeded = false;

        loop {
            let segment = tokio::select! {
                _ = self.cancellation.cancelled() => break,
                segment = segments.recv() => match segment {
                    Some(segment) => segment,
                    None => break,
                },
            };

            if !speaking_started {
                if self.send_tts_start().await.is_err() {
                    break;
                }
                speaking_started = true;
            }

            match self.synthesize_segment(segment).await {
                Ok(()) => any_segment_succeeded = true,
                Err(err) => {
                    warn!(turn_id = self.turn_id, error = %err, "tts segment synthesis failed, continuing with next segment");
                }
            }
        }

        if speaking_started && any_segment_succeeded {
            let _ = self
                .outbound
                .send_turn(
                    self.epoch,
                    OutboundItem::Text(ServerFrame::TtsEnd {
                        session_id: self.session_id_string.clone(),
                        turn_id: self.turn_id,
                    }),
                )
                .await;
        }

        TtsWorkerOutcome {
            speaking_started,
            any_segment_succeeded,
        }
    }

    async fn send_tts_start(&self) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if session.turn.as_ref().is_some_and(|t| t.turn_id == self.turn_id && t.epoch == self.epoch) {
                session.phase = TurnPhase::Speaking;
            }
        }
        let _ = self.runtime_tx.send(RuntimeEvent::PhaseChanged {
            session_id: self.session_id,
            turn_id: Some(self.turn_id),
            phase: TurnPhase::Speaking,
        });
        self.outbound
            .send_turn(
                self.epoch,
                OutboundItem::Text(ServerFrame::tts_start(
                    self.session_id_string.clone(),
                    self.turn_id,
                )),
            )
            .await
    }

    async fn synthesize_segment(
        &self,
        segment: crate::pipeline::messages::SpeechSegment,
    ) -> Result<()> {
        let _ = self.runtime_tx.send(RuntimeEvent::SpeechSegment {
            session_id: self.session_id,
            segment: segment.clone(),
        });
        self.adjust_outstanding_segments(1).await;
        let result = self.synthesize_segment_inner(&segment).await;
        self.adjust_outstanding_segments(-1).await;
        result
    }

    async fn synthesize_segment_inner(
        &self,
        segment: &crate::pipeline::messages::SpeechSegment,
    ) -> Result<()> {
        let stream = timeout(
            Duration::from_millis(self.config.timeouts.tts_first_chunk_ms),
            self.tts.synthesize(&segment.text, self.cancellation.clone()),
        )
        .await
        .map_err(|_| crate::error::OrchestratorError::TtsAdapter("first chunk timeout".into()))??;

        while let Some(chunk) = stream.next_chunk().await? {
            if self.cancellation.is_cancelled() {
                break;
            }
            self.outbound
                .send_turn(self.epoch, OutboundItem::Pcm(chunk))
                .await?;
        }
        Ok(())
    }

    async fn adjust_outstanding_segments(&self, delta: i64) {
        let mut session = self.session.lock().await;
        if let Some(active) = session.turn.as_mut() {
            if active.turn_id == self.turn_id && active.epoch == self.epoch {
                active.outstanding_segments =
                    (active.outstanding_segments as i64 + delta).max(0) as u64;
            }
        }
    }
}
