//! Retrying call wrapper for stateful remote actors.
//!
//! The actor's location/identity may change between attempts, so every
//! attempt resolves a fresh handle before running the operation.

pub mod retry;

pub use retry::{backoff_delay, call_with_retries, Retryable, RetryConfig};
