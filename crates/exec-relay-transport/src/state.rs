//! Shared relay state for the transport handlers.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use exec_relay_core::{EventStore, ExecutionId, SessionId};
use exec_relay_session::{JobTracker, LeaseManager};

/// Application state shared across transport handlers.
///
/// One [`JobTracker`] exists per session; the lease manager is the sole
/// arbiter of which execution may run.
pub struct RelayState {
    pub store: Arc<EventStore>,
    pub leases: Arc<LeaseManager>,
    trackers: RwLock<HashMap<SessionId, Arc<JobTracker>>>,
    /// Executions with a live ingest connection.
    ingest_active: Mutex<HashSet<ExecutionId>>,
}

impl RelayState {
    /// Create relay state around a store and lease manager.
    #[must_use]
    pub fn new(store: Arc<EventStore>, leases: Arc<LeaseManager>) -> Self {
        Self {
            store,
            leases,
            trackers: RwLock::new(HashMap::new()),
            ingest_active: Mutex::new(HashSet::new()),
        }
    }

    /// Job tracker for a session, created on first use.
    #[must_use]
    pub fn tracker(&self, session_id: SessionId) -> Arc<JobTracker> {
        let mut trackers = self.trackers.write().unwrap();
        Arc::clone(
            trackers
                .entry(session_id)
                .or_insert_with(|| Arc::new(JobTracker::new())),
        )
    }

    /// Claim the single ingest slot for an execution. False when another
    /// ingest connection is already live.
    #[must_use]
    pub fn try_claim_ingest(&self, execution_id: ExecutionId) -> bool {
        self.ingest_active.lock().unwrap().insert(execution_id)
    }

    /// Release an ingest slot on detach.
    pub fn release_ingest(&self, execution_id: ExecutionId) {
        self.ingest_active.lock().unwrap().remove(&execution_id);
    }

    /// Drop all per-session state on teardown.
    pub fn remove_session(&self, session_id: SessionId) {
        self.store.remove_session(session_id);
        self.trackers.write().unwrap().remove(&session_id);
    }
}
