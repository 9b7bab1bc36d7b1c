//! **Session registry**: call id → live session, the single dispatch point for call events.
//!
//! Events are delivered serially through [`SessionRegistry::dispatch`] and fanned out to one
//! task per call, so a slow turn on one call never delays events for another. Insert on
//! call-start and removal on call-ended are atomic map operations.

use crate::events::CallEvent;
use crate::policy::{Capabilities, DialogPolicy};
use crate::session::{CallSession, CallState, SessionDeps, UnsavedCalls};
use crate::vad::VoiceActivityDetector;
use asya_core::CallStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

struct SessionEntry {
    events: mpsc::UnboundedSender<CallEvent>,
    state: watch::Receiver<CallState>,
}

/// Owns every live call session.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    deps: SessionDeps,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

impl SessionRegistry {
    pub fn new(
        caps: Capabilities,
        policy: Arc<DialogPolicy>,
        store: Arc<dyn CallStore>,
        vad: Arc<dyn VoiceActivityDetector>,
    ) -> Self {
        let unsaved: UnsavedCalls = Arc::new(DashMap::new());
        Self {
            sessions: DashMap::new(),
            deps: SessionDeps {
                caps,
                policy,
                store,
                vad,
                unsaved,
            },
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Route one event. Never blocks on a session.
    pub fn dispatch(&self, event: CallEvent) {
        match event {
            CallEvent::CallStart {
                call_id,
                caller_number,
            } => self.start_session(call_id, caller_number),
            CallEvent::CallEnded { call_id } => {
                let Some((call_id, entry)) = self.sessions.remove(&call_id) else {
                    warn!(call_id = %call_id, "call-ended for unknown call dropped");
                    return;
                };
                if entry.events.send(CallEvent::CallEnded { call_id: call_id.clone() }).is_err() {
                    error!(call_id = %call_id, "session task gone before call-ended");
                }
            }
            other => {
                let Some(entry) = self.sessions.get(other.call_id()) else {
                    warn!(call_id = %other.call_id(), event = other.kind(), "event for unknown call dropped");
                    return;
                };
                if entry.events.send(other).is_err() {
                    error!(call_id = %entry.key(), "session task gone");
                }
            }
        }
    }

    fn start_session(&self, call_id: String, caller_number: String) {
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(call_id = %call_id, "call-start during shutdown rejected");
            return;
        }
        match self.sessions.entry(call_id) {
            Entry::Occupied(existing) => {
                warn!(call_id = %existing.key(), "duplicate call-start rejected");
            }
            Entry::Vacant(slot) => {
                let session = CallSession::new(slot.key().clone(), caller_number.clone(), self.deps.clone());
                let (tx, rx) = mpsc::unbounded_channel();
                let state = session.subscribe();
                info!(call_id = %slot.key(), caller = %caller_number, "call started");
                slot.insert(SessionEntry { events: tx, state });
                self.tracker.spawn(session.run(rx));
            }
        }
    }

    pub fn active_calls(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn state(&self, call_id: &str) -> Option<CallState> {
        self.sessions.get(call_id).map(|e| *e.state.borrow())
    }

    /// State updates of a live call.
    pub fn watch_state(&self, call_id: &str) -> Option<watch::Receiver<CallState>> {
        self.sessions.get(call_id).map(|e| e.state.clone())
    }

    pub fn unsaved_count(&self) -> usize {
        self.deps.unsaved.len()
    }

    /// Retry commits that failed at hang-up. Returns how many succeeded.
    pub async fn flush_unsaved(&self) -> usize {
        let pending: Vec<String> = self.deps.unsaved.iter().map(|e| e.key().clone()).collect();
        let mut saved = 0;
        for call_id in pending {
            let Some(record) = self.deps.unsaved.get(&call_id).map(|r| r.value().clone()) else {
                continue;
            };
            match self.deps.store.commit_call(&record).await {
                Ok(record_id) => {
                    self.deps.unsaved.remove(&call_id);
                    info!(call_id = %call_id, record_id = %record_id, "unsaved call committed");
                    saved += 1;
                }
                Err(e) => warn!(call_id = %call_id, error = %e, "retry commit failed"),
            }
        }
        saved
    }

    /// End every live call, wait for each to finalize, then retry unsaved records.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let live = self.active_calls();
        info!(calls = live.len(), "draining sessions");
        for call_id in live {
            self.dispatch(CallEvent::CallEnded { call_id });
        }
        self.tracker.close();
        self.tracker.wait().await;
        let saved = self.flush_unsaved().await;
        let left = self.unsaved_count();
        if left > 0 {
            error!(unsaved = left, "calls could not be persisted");
        } else {
            debug!(saved, "registry drained");
        }
    }
}
