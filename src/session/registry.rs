//! Session registry: concurrent lookup, single-writer insert/remove, and the
//! idle-timeout reaper (spec.md §4.9, §5 "Shared resources").

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use super::types::Session;

/// A registry entry: a reference-counted, lockable session handle so
/// in-flight operations see a stable `Session` even during teardown
/// (spec.md §5).
pub type SessionHandle = Arc<Mutex<Session>>;

/// Snapshot of a session's wire-health counters, for the ambient
/// session-count/operability endpoints.
#[derive(Debug, Clone, Copy)]
pub struct SessionHealth {
    pub session_id: Uuid,
    pub malformed_frames: u64,
    pub dropped_frames: u64,
}

/// Maps `session_id` to `Session`. Permits concurrent lookup and
/// single-writer insertion/removal (spec.md §5).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created session.
    pub async fn insert(&self, session: Session) -> SessionHandle {
        let id = session.session_id;
        let handle: SessionHandle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, handle.clone());
        handle
    }

    /// Register a session whose handle already exists, e.g. one owned by a
    /// running [`crate::pipeline::SessionRuntime`]. The registry and the
    /// runtime then share the same underlying `Session`.
    pub async fn insert_handle(&self, id: Uuid, handle: SessionHandle) {
        self.sessions.write().await.insert(id, handle);
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of per-session malformed/dropped frame counters, exposed for
    /// the ambient operability surface (not part of spec.md's core, see
    /// SPEC_FULL.md "Supplemented features").
    pub async fn health_snapshot(&self) -> Vec<SessionHealth> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (id, handle) in sessions.iter() {
            let session = handle.lock().await;
            out.push(SessionHealth {
                session_id: *id,
                malformed_frames: session.malformed_frames.load(Ordering::Relaxed),
                dropped_frames: session.dropped_frames.load(),
            });
        }
        out
    }

    /// Scan for sessions idle longer than `idle_timeout` and retire them,
    /// cancelling their cancellation root so their tasks unwind. Returns the
    /// ids retired this pass.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> Vec<Uuid> {
        let candidates: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            let mut idle = Vec::new();
            for (id, handle) in sessions.iter() {
                let session = handle.lock().await;
                if session.idle_for() >= idle_timeout {
                    idle.push(*id);
                }
            }
            idle
        };

        let mut retired = Vec::new();
        for id in candidates {
            if let Some(handle) = self.remove(id).await {
                let session = handle.lock().await;
                session.cancellation.cancel();
                info!(session_id = %id, "retiring idle session");
                retired.push(id);
            }
        }
        retired
    }

    /// Runs forever, reaping idle sessions on a fixed interval. Intended to
    /// be spawned once per server process.
    pub async fn run_reaper(self: Arc<Self>, idle_timeout: Duration, check_interval: Duration) {
        let mut ticker = tokio::time::interval(check_interval);
        loop {
            ticker.tick().await;
            let retired = self.reap_idle(idle_timeout).await;
            if !retired.is_empty() {
                warn!(count = retired.len(), "reaper retired idle sessions");
            }
        }
    }
}
