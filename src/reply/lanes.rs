//! Per-session execution slots
//!
//! Every session key gets a lane while at least one turn for it is admitted.
//! The lane's slot serializes engine runs for the key; its epoch counter lets
//! an interrupt invalidate every turn admitted before it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedMutexGuard, oneshot};

use crate::session::SessionKey;

#[derive(Debug)]
struct ActiveRun {
    session_id: String,
    cancel: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LaneState {
    epoch: u64,
    active: Option<ActiveRun>,
}

#[derive(Debug, Default)]
struct Lane {
    slot: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<LaneState>,
}

impl Lane {
    fn state(&self) -> MutexGuard<'_, LaneState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct LaneEntry {
    lane: Arc<Lane>,
    admitted: usize,
}

/// Lanes for every busy session
#[derive(Debug, Default)]
pub struct SessionLanes {
    lanes: Mutex<HashMap<SessionKey, LaneEntry>>,
}

impl SessionLanes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, LaneEntry>> {
        self.lanes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a turn for `key` and record the current epoch
    ///
    /// The lane stays alive until every admission for it is dropped.
    pub fn admit(self: &Arc<Self>, key: &SessionKey) -> Admission {
        let lane = {
            let mut lanes = self.lock();
            let entry = lanes.entry(key.clone()).or_insert_with(|| LaneEntry {
                lane: Arc::new(Lane::default()),
                admitted: 0,
            });
            entry.admitted += 1;
            Arc::clone(&entry.lane)
        };
        let epoch = lane.state().epoch;

        Admission {
            lanes: Arc::clone(self),
            key: key.clone(),
            lane,
            epoch,
        }
    }

    /// Whether any turn is admitted for `key`
    #[must_use]
    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.lock().get(key).is_some_and(|e| e.admitted > 0)
    }

    /// Invalidate every turn admitted so far and cancel the running one
    ///
    /// Returns the engine session id of the cancelled run, if one was
    /// executing, so the caller can ask the engine to abort it.
    pub fn interrupt(&self, key: &SessionKey) -> Option<String> {
        let lane = self.lock().get(key).map(|e| Arc::clone(&e.lane))?;
        let mut state = lane.state();
        state.epoch += 1;
        let active = state.active.take()?;
        let _ = active.cancel.send(());
        Some(active.session_id)
    }

    /// Number of keys with live lanes
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &SessionKey) {
        let mut lanes = self.lock();
        if let Some(entry) = lanes.get_mut(key) {
            entry.admitted = entry.admitted.saturating_sub(1);
            if entry.admitted == 0 {
                lanes.remove(key);
            }
        }
    }
}

/// A turn's claim on its session lane
#[derive(Debug)]
pub struct Admission {
    lanes: Arc<SessionLanes>,
    key: SessionKey,
    lane: Arc<Lane>,
    epoch: u64,
}

impl Admission {
    /// Wait for the session's execution slot
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lane.slot).lock_owned().await
    }

    /// Whether no interrupt has happened since admission
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.lane.state().epoch == self.epoch
    }

    /// Mark the engine as running for this turn
    ///
    /// Returns `None` if the turn was interrupted before it could start. The
    /// receiver fires when a later interrupt cancels the run.
    pub fn begin_run(&self, session_id: &str) -> Option<oneshot::Receiver<()>> {
        let mut state = self.lane.state();
        if state.epoch != self.epoch {
            return None;
        }
        let (cancel, cancelled) = oneshot::channel();
        state.active = Some(ActiveRun {
            session_id: session_id.to_string(),
            cancel,
        });
        Some(cancelled)
    }

    /// Clear the running marker set by [`Admission::begin_run`]
    pub fn end_run(&self) {
        let mut state = self.lane.state();
        if state.epoch == self.epoch {
            state.active = None;
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.lanes.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key() -> SessionKey {
        SessionKey::from("agent:main:discord:group:42")
    }

    #[test]
    fn lane_lives_while_admitted() {
        let lanes = Arc::new(SessionLanes::new());
        let first = lanes.admit(&key());
        let second = lanes.admit(&key());
        assert!(lanes.is_active(&key()));

        drop(first);
        assert!(lanes.is_active(&key()));
        drop(second);
        assert!(!lanes.is_active(&key()));
        assert!(lanes.is_empty());
    }

    #[tokio::test]
    async fn slot_is_exclusive() {
        let lanes = Arc::new(SessionLanes::new());
        let first = lanes.admit(&key());
        let second = lanes.admit(&key());

        let held = first.acquire().await;
        let waiting = tokio::time::timeout(Duration::from_millis(20), second.acquire()).await;
        assert!(waiting.is_err());

        drop(held);
        let _next = second.acquire().await;
    }

    #[test]
    fn interrupt_cancels_running_and_stales_waiters() {
        let lanes = Arc::new(SessionLanes::new());
        let running = lanes.admit(&key());
        let waiting = lanes.admit(&key());
        let mut cancelled = running.begin_run("sess-1").unwrap();

        assert_eq!(lanes.interrupt(&key()).as_deref(), Some("sess-1"));
        assert!(cancelled.try_recv().is_ok());
        assert!(!running.is_current());
        assert!(!waiting.is_current());
        assert!(waiting.begin_run("sess-1").is_none());

        let fresh = lanes.admit(&key());
        assert!(fresh.is_current());
    }

    #[test]
    fn interrupt_without_run_only_bumps_epoch() {
        let lanes = Arc::new(SessionLanes::new());
        assert!(lanes.interrupt(&key()).is_none());

        let admitted = lanes.admit(&key());
        assert!(lanes.interrupt(&key()).is_none());
        assert!(!admitted.is_current());
    }
}
