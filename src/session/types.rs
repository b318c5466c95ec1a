//! Session and turn data model (spec.md §3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared, cheaply-cloned handle onto a session's generation epoch
/// (spec.md §5 "Cancellation"). `Session` owns the authoritative counter;
/// the outbound scheduler holds a clone so it can check an item's epoch
/// against the current one without taking the session lock per item.
#[derive(Clone)]
pub struct EpochGate {
    current: Arc<AtomicU64>,
}

impl EpochGate {
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether `epoch` has been superseded by a later cancellation.
    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.current()
    }
}

impl Default for EpochGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaply-cloned, cross-task counter. `Session` holds the authoritative
/// instance; the outbound scheduler holds a clone so it can record drops
/// from its own task without taking the session lock per item.
#[derive(Clone)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for DropCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse state of the turn state machine (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Listening,
    Transcribed,
    Thinking,
    Speaking,
    Interrupted,
    Error,
}

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// Exists only during `THINKING`/`SPEAKING` (spec.md §3).
pub struct TurnContext {
    pub turn_id: u64,
    /// This turn's generation epoch. Matches the session epoch at the
    /// moment the turn was created; stamped on every outbound item produced
    /// while this context is active (spec.md §4.8).
    pub epoch: u64,
    pub cancellation: CancellationToken,
    /// Set once the triggering ASR Final arrives.
    pub user_text: String,
    /// Running accumulation of assistant token fragments.
    pub assistant_buffer: String,
    /// Number of TTS segments dispatched for this turn that have not yet
    /// reached `tts_end`/`tts_stop`.
    pub outstanding_segments: u64,
}

impl TurnContext {
    pub fn new(turn_id: u64, epoch: u64, parent: &CancellationToken, user_text: String) -> Self {
        Self {
            turn_id,
            epoch,
            cancellation: parent.child_token(),
            user_text,
            assistant_buffer: String::new(),
            outstanding_segments: 0,
        }
    }
}

/// Per-connection conversational state (spec.md §3 `Session`).
pub struct Session {
    pub session_id: Uuid,
    pub created_at: Instant,
    pub phase: TurnPhase,
    pub history: Vec<ChatMessage>,
    pub turn: Option<TurnContext>,
    pub last_activity: Instant,
    /// Monotonic counter: the next turn id to assign.
    next_turn_id: u64,
    /// Turn id allocated at LISTENING entry, before a Final transcript (and
    /// therefore a TurnContext) exists. `partial_transcript`/`final_transcript`
    /// frames for the in-progress utterance carry this id; `begin_turn`
    /// consumes it rather than allocating a fresh one.
    pending_turn_id: Option<u64>,
    /// Generation epoch, bumped on every turn cancellation (spec.md §5).
    epoch: EpochGate,
    /// Root of this session's cancellation hierarchy.
    pub cancellation: CancellationToken,
    pub malformed_frames: AtomicU64,
    /// Frames/items dropped by the outbound scheduler for carrying a stale
    /// epoch (spec.md §4.8, invariant I2).
    pub dropped_frames: DropCounter,
}

impl Session {
    pub fn new(session_id: Uuid) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            created_at: now,
            phase: TurnPhase::Idle,
            history: Vec::new(),
            turn: None,
            last_activity: now,
            next_turn_id: 1,
            pending_turn_id: None,
            epoch: EpochGate::new(),
            cancellation: CancellationToken::new(),
            malformed_frames: AtomicU64::new(0),
            dropped_frames: DropCounter::new(),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.current()
    }

    /// A cheaply-cloned handle onto this session's dropped-item counter, for
    /// the outbound scheduler to increment without taking the session lock.
    pub fn drop_counter(&self) -> DropCounter {
        self.dropped_frames.clone()
    }

    /// Bump the session epoch, stranding any outbound item tagged with an
    /// older epoch (spec.md §5 "Cancellation" step 1).
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.advance()
    }

    /// A cheaply-cloned handle onto this session's epoch counter, for the
    /// outbound scheduler to check against without taking the session lock.
    pub fn epoch_gate(&self) -> EpochGate {
        self.epoch.clone()
    }

    /// Allocate (or return the already-allocated) turn id for the utterance
    /// now being listened to, e.g. on `start` or on re-entering LISTENING
    /// after an interrupt. ASR partial/final transcripts for this utterance
    /// carry this id ahead of any TurnContext existing.
    pub fn begin_listening(&mut self) -> u64 {
        if let Some(id) = self.pending_turn_id {
            return id;
        }
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        self.pending_turn_id = Some(id);
        id
    }

    /// Begin a new turn: consumes the pending turn id from `begin_listening`
    /// (allocating one on the spot if the caller skipped that step) and
    /// installs a fresh `TurnContext` at the *current* epoch. Callers that
    /// are superseding a prior turn must cancel it and call `advance_epoch`
    /// first.
    pub fn start_turn(&mut self, user_text: String) -> u64 {
        let turn_id = self.pending_turn_id.take().unwrap_or_else(|| {
            let id = self.next_turn_id;
            self.next_turn_id += 1;
            id
        });
        let epoch = self.current_epoch();
        self.turn = Some(TurnContext::new(
            turn_id,
            epoch,
            &self.cancellation,
            user_text,
        ));
        turn_id
    }

    /// Cancel and clear the active turn, if any, bumping the epoch so any
    /// in-flight outbound items for it are dropped by the scheduler.
    pub fn cancel_turn(&mut self) {
        self.pending_turn_id = None;
        if let Some(turn) = self.turn.take() {
            turn.cancellation.cancel();
            self.advance_epoch();
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }
}
