//! Session orchestration: execution leases and job state.
//!
//! The lease manager is the sole arbiter of "who may currently run" for a
//! session; the job tracker owns the inflight prompt set for the currently
//! active job.

pub mod job;
pub mod lease;

pub use job::{InflightEntry, JobContext, JobError, JobState, JobStatus, JobTracker};
pub use lease::{AcquireOutcome, ExecutionLease, LeaseConfig, LeaseError, LeaseManager};
