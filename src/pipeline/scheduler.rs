//! Outbound scheduler: single-writer serialization of server→client frames
//! with epoch-based stale-turn suppression (spec.md §4.8, invariant I2).

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::session::types::{DropCounter, EpochGate};
use crate::wire::ServerFrame;

/// One item destined for the wire: a text frame or a raw PCM chunk, tagged
/// with the epoch of the turn that produced it.
#[derive(Debug, Clone)]
pub enum OutboundItem {
    Text(ServerFrame),
    Pcm(Vec<u8>),
}

/// A queued item plus the epoch it was tagged with.
struct Tagged {
    epoch: Option<u64>,
    item: OutboundItem,
}

/// Handle producer tasks use to enqueue outbound items.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Tagged>,
}

impl OutboundSender {
    /// Enqueue an item not tied to any turn (e.g. `status`, `error` frames
    /// emitted outside a turn).
    pub async fn send_session(&self, item: OutboundItem) -> Result<()> {
        self.tx
            .send(Tagged { epoch: None, item })
            .await
            .map_err(|_| OrchestratorError::Channel("outbound scheduler closed".into()))
    }

    /// Enqueue an item tagged with a turn's epoch; dropped by the consumer
    /// if that epoch is stale by the time it would be written.
    pub async fn send_turn(&self, epoch: u64, item: OutboundItem) -> Result<()> {
        self.tx
            .send(Tagged {
                epoch: Some(epoch),
                item,
            })
            .await
            .map_err(|_| OrchestratorError::Channel("outbound scheduler closed".into()))
    }
}

/// Sink the scheduler drains into. In production this is the WebSocket
/// writer; tests use an in-memory recorder.
#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    async fn write_text(&mut self, frame: ServerFrame) -> Result<()>;
    async fn write_pcm(&mut self, pcm: Vec<u8>) -> Result<()>;
}

/// Drains the outbound queue to `sink`, dropping items whose epoch has gone
/// stale (spec.md §4.8) and applying the PCM block-then-teardown backpressure
/// policy (spec.md §5) via `pcm_block_bound`.
pub struct OutboundScheduler {
    rx: mpsc::Receiver<Tagged>,
    gate: EpochGate,
    pcm_block_bound: Duration,
    drops: DropCounter,
}

/// Construct a scheduler and the sender handle producers use.
pub fn channel(
    capacity: usize,
    gate: EpochGate,
    pcm_block_bound: Duration,
    drops: DropCounter,
) -> (OutboundSender, OutboundScheduler) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        OutboundSender { tx },
        OutboundScheduler {
            rx,
            gate,
            pcm_block_bound,
            drops,
        },
    )
}

impl OutboundScheduler {
    /// Drain until the channel closes or the sink reports a fatal write
    /// error (signalling client-slow teardown or a channel error).
    pub async fn run(mut self, sink: &mut (impl OutboundSink + ?Sized)) -> Result<()> {
        while let Some(tagged) = self.rx.recv().await {
            if let Some(epoch) = tagged.epoch {
                if self.gate.is_stale(epoch) {
                    debug!(epoch, current = self.gate.current(), "dropping stale outbound item");
                    self.drops.increment();
                    continue;
                }
            }

            let write = async {
                match tagged.item {
                    OutboundItem::Text(frame) => sink.write_text(frame).await,
                    OutboundItem::Pcm(pcm) => sink.write_pcm(pcm).await,
                }
            };

            match tokio::time::timeout(self.pcm_block_bound, write).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("outbound write exceeded backpressure bound, tearing down");
                    return Err(OrchestratorError::Channel(
                        "client too slow to drain outbound queue".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
