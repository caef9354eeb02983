//! Error taxonomy for the scheduler core.
//!
//! Precondition errors (bad schedule, unknown kind, bad config) are typed
//! and fail synchronously — they are never written to the store. Transport
//! errors from store backends travel as `anyhow::Error` and surface through
//! the `Store` variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The job kind has no registered handler.
    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    /// The schedule expression is malformed or names an unknown timezone.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Configuration rejected at construction time.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// Transport-level store failure (network, I/O, contention).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
