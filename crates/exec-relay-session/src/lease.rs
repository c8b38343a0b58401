//! Single active-execution lease per session.

use std::{collections::HashMap, sync::RwLock, time::Duration};

use chrono::{DateTime, Utc};
use exec_relay_core::{ExecutionId, SessionId};
use thiserror::Error;
use uuid::Uuid;

/// Lease configuration.
#[derive(Debug, Clone, Copy)]
pub struct LeaseConfig {
    /// How long a granted or renewed lease lives without a renewal.
    pub ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
        }
    }
}

/// A time-bounded token granting exclusive execution rights for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLease {
    pub session_id: SessionId,
    pub execution_id: ExecutionId,
    pub owner_token: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExecutionLease {
    /// Whether the lease has expired at `now` and is reclaimable by any
    /// caller, without the original owner's cooperation.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of an acquire attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The slot is held by the requesting execution.
    Granted(ExecutionLease),
    /// A different, non-expired lease holds the slot.
    Conflict {
        /// Execution currently holding the lease.
        current_owner: ExecutionId,
    },
}

/// Lease error.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Lease for session {session_id} is not owned by execution {execution_id}")]
    NotOwner {
        session_id: SessionId,
        execution_id: ExecutionId,
    },
}

/// Grants, renews, and revokes the single active-execution slot per
/// session.
///
/// Expiry is checked lazily by comparison on the next `acquire`/`renew`,
/// so no sweeper task is needed to keep the one-live-lease invariant.
/// All execution dispatch must go through [`LeaseManager::acquire`] and
/// treat a conflict as authoritative.
pub struct LeaseManager {
    config: LeaseConfig,
    leases: RwLock<HashMap<SessionId, ExecutionLease>>,
}

impl LeaseManager {
    /// Create a manager with the given config.
    #[must_use]
    pub fn new(config: LeaseConfig) -> Self {
        Self {
            config,
            leases: RwLock::new(HashMap::new()),
        }
    }

    /// Try to take the execution slot for a session.
    ///
    /// Granted if no lease exists, the existing lease is expired, or the
    /// existing lease belongs to the same execution (idempotent re-entry,
    /// which also refreshes the expiry).
    pub fn acquire(&self, session_id: SessionId, execution_id: ExecutionId) -> AcquireOutcome {
        let now = Utc::now();
        let mut leases = self.leases.write().unwrap();

        if let Some(existing) = leases.get(&session_id) {
            if !existing.is_expired(now) && existing.execution_id != execution_id {
                return AcquireOutcome::Conflict {
                    current_owner: existing.execution_id,
                };
            }
            if existing.execution_id != execution_id {
                tracing::debug!(
                    %session_id,
                    stale = %existing.execution_id,
                    "reclaiming expired lease"
                );
            }
        }

        let lease = ExecutionLease {
            session_id,
            execution_id,
            owner_token: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + self.config.ttl,
        };
        leases.insert(session_id, lease.clone());
        AcquireOutcome::Granted(lease)
    }

    /// Extend the lease held by `execution_id`.
    ///
    /// Owners should renew at half the TTL; a missed renewal makes the
    /// slot reclaimable once the TTL elapses.
    ///
    /// # Errors
    /// Returns [`LeaseError::NotOwner`] if the session's lease is absent,
    /// expired, or held by a different execution.
    pub fn renew(
        &self,
        session_id: SessionId,
        execution_id: ExecutionId,
        new_expiry: DateTime<Utc>,
    ) -> Result<(), LeaseError> {
        let now = Utc::now();
        let mut leases = self.leases.write().unwrap();

        match leases.get_mut(&session_id) {
            Some(lease) if lease.execution_id == execution_id && !lease.is_expired(now) => {
                lease.expires_at = new_expiry;
                Ok(())
            }
            _ => Err(LeaseError::NotOwner {
                session_id,
                execution_id,
            }),
        }
    }

    /// Release the lease held by `execution_id`. No-op when the lease is
    /// already absent or owned by someone else.
    pub fn release(&self, session_id: SessionId, execution_id: ExecutionId) {
        let mut leases = self.leases.write().unwrap();
        if leases
            .get(&session_id)
            .is_some_and(|l| l.execution_id == execution_id)
        {
            leases.remove(&session_id);
        }
    }

    /// Current lease for a session, expired or not.
    #[must_use]
    pub fn get(&self, session_id: SessionId) -> Option<ExecutionLease> {
        self.leases.read().unwrap().get(&session_id).cloned()
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new(LeaseConfig::default())
    }
}
