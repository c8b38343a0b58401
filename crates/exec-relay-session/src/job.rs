//! Job context and inflight prompt tracking.

use std::{collections::BTreeMap, sync::Mutex};

use chrono::{DateTime, Utc};
use exec_relay_core::{ExecutionId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything a job needs to reach its actor and ingest channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub execution_id: ExecutionId,
    pub session_id: SessionId,
    pub user_id: String,
    /// Session id on the remote actor side, once known.
    pub remote_session_id: Option<String>,
    pub ingest_url: String,
    pub ingest_token: String,
    pub auth_token: String,
}

/// A dispatched prompt awaiting completion or deadline expiry.
#[derive(Debug, Clone)]
pub struct InflightEntry {
    pub message_id: String,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

/// Derived job state: active iff any prompt is inflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Active,
}

/// Snapshot for polling clients not on the WebSocket path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    pub inflight: Vec<String>,
    pub inflight_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Job tracking error.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job conflict: execution {active} is still active")]
    JobConflict { active: ExecutionId },
    #[error("No job context")]
    NoJob,
}

struct Inner {
    job: Option<JobContext>,
    /// Keyed by message id; BTreeMap keeps status listings sorted.
    inflight: BTreeMap<String, InflightEntry>,
    message_counter: u64,
    last_error: Option<String>,
    last_activity: DateTime<Utc>,
}

/// Tracks the one live job for a session and its outstanding prompts.
///
/// Owned by exactly one job-processing context at a time; constructed
/// explicitly and passed by reference to the handlers that need it. The
/// external idle-timeout sweep reads [`JobTracker::last_activity`] and
/// calls [`JobTracker::clear_job`] when the tracker has gone quiet.
pub struct JobTracker {
    inner: Mutex<Inner>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    /// Create an idle tracker with no job.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                job: None,
                inflight: BTreeMap::new(),
                message_counter: 0,
                last_error: None,
                last_activity: Utc::now(),
            }),
        }
    }

    /// Install a job context.
    ///
    /// Re-creation with the same execution id is a no-op that preserves
    /// the message counter. A different execution id while prompts are
    /// still inflight is rejected, naming the active execution.
    ///
    /// # Errors
    /// Returns [`JobError::JobConflict`] when a different job is active.
    pub fn start_job(&self, ctx: JobContext) -> Result<(), JobError> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_activity = Utc::now();

        if let Some(current) = &inner.job {
            if current.execution_id == ctx.execution_id {
                return Ok(());
            }
            if !inner.inflight.is_empty() {
                return Err(JobError::JobConflict {
                    active: current.execution_id,
                });
            }
        }

        tracing::debug!(execution_id = %ctx.execution_id, session_id = %ctx.session_id, "job started");
        inner.job = Some(ctx);
        inner.message_counter = 0;
        inner.last_error = None;
        Ok(())
    }

    /// Drop the job and all inflight entries, resetting per-job counters.
    pub fn clear_job(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.job = None;
        inner.inflight.clear();
        inner.message_counter = 0;
        inner.last_activity = Utc::now();
    }

    /// Current job context, if any.
    #[must_use]
    pub fn job(&self) -> Option<JobContext> {
        self.inner.lock().unwrap().job.clone()
    }

    /// Record a prompt dispatched to the actor.
    pub fn add_inflight(&self, message_id: impl Into<String>, deadline_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        let message_id = message_id.into();
        inner.inflight.insert(
            message_id.clone(),
            InflightEntry {
                message_id,
                started_at: Utc::now(),
                deadline_at,
            },
        );
        inner.last_activity = Utc::now();
    }

    /// Remove a completed prompt. False when the id was never added or
    /// was already removed.
    pub fn remove_inflight(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.last_activity = Utc::now();
        inner.inflight.remove(message_id).is_some()
    }

    /// Message ids whose deadline has passed at `now`.
    #[must_use]
    pub fn expired_inflight(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .inflight
            .values()
            .filter(|entry| entry.deadline_at <= now)
            .map(|entry| entry.message_id.clone())
            .collect()
    }

    /// Drop every inflight entry.
    pub fn clear_all_inflight(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.inflight.clear();
        inner.last_activity = Utc::now();
    }

    /// Next message id for the active job: the first 8 hex chars of the
    /// execution id plus a strictly increasing per-job counter, so ids
    /// are stable and sortable within a job.
    ///
    /// # Errors
    /// Returns [`JobError::NoJob`] when no job context is installed.
    pub fn next_message_id(&self) -> Result<String, JobError> {
        let mut inner = self.inner.lock().unwrap();
        let prefix = {
            let job = inner.job.as_ref().ok_or(JobError::NoJob)?;
            job.execution_id.simple().to_string()[..8].to_string()
        };
        inner.message_counter += 1;
        inner.last_activity = Utc::now();
        Ok(format!("{prefix}-{:06}", inner.message_counter))
    }

    /// Record the most recent job-level error. Cleared by the next
    /// successful [`JobTracker::start_job`].
    pub fn record_error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_error = Some(message.into());
        inner.last_activity = Utc::now();
    }

    /// Whether any prompt is inflight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.lock().unwrap().inflight.is_empty()
    }

    /// Timestamp of the last mutating call, for the idle-timeout sweep.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().last_activity
    }

    /// Snapshot of the tracker for polling clients.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        let inner = self.inner.lock().unwrap();
        let state = if inner.inflight.is_empty() {
            JobState::Idle
        } else {
            JobState::Active
        };
        JobStatus {
            state,
            execution_id: inner.job.as_ref().map(|j| j.execution_id),
            inflight: inner.inflight.keys().cloned().collect(),
            inflight_count: inner.inflight.len(),
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn context(execution_id: ExecutionId) -> JobContext {
        JobContext {
            execution_id,
            session_id: Uuid::new_v4(),
            user_id: "user-1".into(),
            remote_session_id: None,
            ingest_url: "ws://localhost:3000/ingest".into(),
            ingest_token: "ingest-token".into(),
            auth_token: "auth-token".into(),
        }
    }

    fn deadline() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(30)
    }

    #[test]
    fn active_tracks_inflight_exactly() {
        let tracker = JobTracker::new();
        tracker.start_job(context(Uuid::new_v4())).unwrap();
        assert!(!tracker.is_active());

        tracker.add_inflight("m-1", deadline());
        tracker.add_inflight("m-2", deadline());
        assert!(tracker.is_active());
        assert_eq!(tracker.status().inflight_count, 2);

        assert!(tracker.remove_inflight("m-1"));
        assert!(tracker.is_active());
        assert!(tracker.remove_inflight("m-2"));
        assert!(!tracker.is_active());

        // Never added, or already removed.
        assert!(!tracker.remove_inflight("m-2"));
        assert!(!tracker.remove_inflight("never"));
    }

    #[test]
    fn start_job_conflict_names_active_execution() {
        let tracker = JobTracker::new();
        let active = Uuid::new_v4();
        tracker.start_job(context(active)).unwrap();
        tracker.add_inflight("m-1", deadline());

        let err = tracker.start_job(context(Uuid::new_v4())).unwrap_err();
        let JobError::JobConflict { active: named } = err else {
            panic!("expected conflict");
        };
        assert_eq!(named, active);
    }

    #[test]
    fn same_execution_restart_is_a_noop() {
        let tracker = JobTracker::new();
        let execution = Uuid::new_v4();
        tracker.start_job(context(execution)).unwrap();

        let first = tracker.next_message_id().unwrap();
        tracker.start_job(context(execution)).unwrap();
        let second = tracker.next_message_id().unwrap();

        // Counter survives the no-op restart.
        assert!(second > first);
        assert!(second.ends_with("-000002"));
    }

    #[test]
    fn idle_job_can_be_replaced() {
        let tracker = JobTracker::new();
        tracker.start_job(context(Uuid::new_v4())).unwrap();
        tracker.record_error("actor unreachable");

        let replacement = Uuid::new_v4();
        tracker.start_job(context(replacement)).unwrap();

        let status = tracker.status();
        assert_eq!(status.execution_id, Some(replacement));
        // Replacement clears the previous job's error and counter.
        assert_eq!(status.last_error, None);
        assert!(tracker.next_message_id().unwrap().ends_with("-000001"));
    }

    #[test]
    fn message_ids_are_stable_and_sortable() {
        let tracker = JobTracker::new();
        let execution = Uuid::new_v4();
        tracker.start_job(context(execution)).unwrap();

        let ids: Vec<String> = (0..3).map(|_| tracker.next_message_id().unwrap()).collect();
        let prefix = &execution.simple().to_string()[..8];

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        for id in &ids {
            assert!(id.starts_with(prefix));
        }
    }

    #[test]
    fn next_message_id_requires_a_job() {
        let tracker = JobTracker::new();
        assert!(matches!(tracker.next_message_id(), Err(JobError::NoJob)));
    }

    #[test]
    fn expired_inflight_honors_deadlines() {
        let tracker = JobTracker::new();
        tracker.start_job(context(Uuid::new_v4())).unwrap();

        let now = Utc::now();
        tracker.add_inflight("late", now - Duration::seconds(5));
        tracker.add_inflight("on-time", now + Duration::seconds(30));

        assert_eq!(tracker.expired_inflight(now), vec!["late".to_string()]);
    }

    #[test]
    fn clear_job_resets_everything() {
        let tracker = JobTracker::new();
        tracker.start_job(context(Uuid::new_v4())).unwrap();
        tracker.add_inflight("m-1", deadline());
        tracker.next_message_id().unwrap();

        tracker.clear_job();
        assert!(tracker.job().is_none());
        assert!(!tracker.is_active());
        assert!(matches!(tracker.next_message_id(), Err(JobError::NoJob)));
    }

    #[test]
    fn status_serializes_for_polling_clients() {
        let tracker = JobTracker::new();
        tracker.start_job(context(Uuid::new_v4())).unwrap();
        tracker.add_inflight("m-1", deadline());

        let value = serde_json::to_value(tracker.status()).unwrap();
        assert_eq!(value["state"], "active");
        assert_eq!(value["inflight_count"], 1);
        assert_eq!(value["inflight"][0], "m-1");
        assert!(value.get("last_error").is_none());
    }

    #[test]
    fn mutations_stamp_last_activity() {
        let tracker = JobTracker::new();
        let before = tracker.last_activity();
        std::thread::sleep(std::time::Duration::from_millis(5));

        tracker.start_job(context(Uuid::new_v4())).unwrap();
        assert!(tracker.last_activity() > before);
    }
}
