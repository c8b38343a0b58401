//! Per-session ordered event log with broadcast fanout.

use std::{collections::HashMap, sync::RwLock};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    error::StoreError,
    event::{parse_timestamp, ExecutionId, IngestEvent, SessionId, StreamEvent},
    filter::EventFilter,
};

/// Broadcast channel capacity per session.
const CHANNEL_CAPACITY: usize = 10_000;

struct SessionLog {
    /// Next id to assign. Ids start at 1 and never skip.
    next_id: u64,
    events: Vec<StreamEvent>,
    sender: broadcast::Sender<StreamEvent>,
}

impl SessionLog {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            next_id: 1,
            events: Vec::new(),
            sender,
        }
    }
}

/// Append-only event store with cursor-based replay.
///
/// Essential for reconnection: a returning client replays everything past
/// its cursor, then seamlessly switches to live updates. Events are never
/// reordered or mutated; the only deletion path is session teardown.
pub struct EventStore {
    sessions: RwLock<HashMap<SessionId, SessionLog>>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session. Idempotent.
    pub fn create_session(&self, session_id: SessionId) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.entry(session_id).or_insert_with(SessionLog::new);
    }

    /// Whether a session is registered.
    #[must_use]
    pub fn session_exists(&self, session_id: SessionId) -> bool {
        self.sessions.read().unwrap().contains_key(&session_id)
    }

    /// Append an ingest event, assigning the next monotonic id for the
    /// session, then fan out to live subscribers.
    ///
    /// The producer timestamp is honored when parseable; otherwise the
    /// event is stamped with the current time.
    ///
    /// # Errors
    /// Returns [`StoreError::SessionNotFound`] for unregistered sessions.
    pub fn append(
        &self,
        session_id: SessionId,
        execution_id: ExecutionId,
        ingest: IngestEvent,
    ) -> Result<StreamEvent, StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let log = sessions
            .get_mut(&session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        let timestamp = ingest
            .timestamp
            .as_ref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let event = StreamEvent {
            event_id: log.next_id,
            execution_id,
            session_id,
            event_type: ingest.event_type,
            timestamp,
            data: ingest.data,
        };
        log.next_id += 1;
        log.events.push(event.clone());

        // Lagging receivers miss events; attach paths recover via replay.
        let _ = log.sender.send(event.clone());

        Ok(event)
    }

    /// Query buffered events. Filters are conjunctive; `from_id` is
    /// exclusive. Results come back in ascending `event_id` order.
    #[must_use]
    pub fn query(&self, session_id: SessionId, filter: &EventFilter) -> Vec<StreamEvent> {
        let sessions = self.sessions.read().unwrap();
        let Some(log) = sessions.get(&session_id) else {
            return Vec::new();
        };
        let from_id = filter.from_id.unwrap_or(0);
        log.events
            .iter()
            .filter(|ev| ev.event_id > from_id && filter.matches(ev))
            .cloned()
            .collect()
    }

    /// Replay snapshot plus live receiver, taken under one lock so the
    /// attach observes every event exactly once relative to its cursor.
    ///
    /// # Errors
    /// Returns [`StoreError::SessionNotFound`] for unregistered sessions.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        filter: &EventFilter,
    ) -> Result<(Vec<StreamEvent>, broadcast::Receiver<StreamEvent>), StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let log = sessions
            .get(&session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        let from_id = filter.from_id.unwrap_or(0);
        let replay = log
            .events
            .iter()
            .filter(|ev| ev.event_id > from_id && filter.matches(ev))
            .cloned()
            .collect();

        Ok((replay, log.sender.subscribe()))
    }

    /// Stream that yields the replay snapshot first, then matching live
    /// events. Lagged live receivers drop events silently here; consumers
    /// that need gap detection should use [`EventStore::subscribe`].
    ///
    /// # Errors
    /// Returns [`StoreError::SessionNotFound`] for unregistered sessions.
    pub fn event_stream(
        &self,
        session_id: SessionId,
        filter: &EventFilter,
    ) -> Result<futures::stream::BoxStream<'static, StreamEvent>, StoreError> {
        let (replay, rx) = self.subscribe(session_id, filter)?;
        let filter = filter.clone();

        let hist = futures::stream::iter(replay);
        let live = BroadcastStream::new(rx).filter_map(move |res| {
            let filter = filter.clone();
            async move { res.ok().filter(|ev| filter.matches(ev)) }
        });

        Ok(Box::pin(hist.chain(live)))
    }

    /// Tear down a session, dropping its log and live channel.
    pub fn remove_session(&self, session_id: SessionId) {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.remove(&session_id).is_some() {
            tracing::debug!(%session_id, "session log removed");
        }
    }
}
