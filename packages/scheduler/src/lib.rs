//! Lease-based distributed job scheduler core.
//!
//! This crate is the scheduling heart of the Emonk assistant: durable job
//! records, an atomic claim protocol with time-bounded leases, and a tick
//! loop that is driven entirely by an external pulse (there is no
//! background polling task). Multiple stateless replicas may tick the same
//! store concurrently; the claim protocol guarantees that no job executes
//! on two replicas at once while expired leases are recoverable after a
//! crash.
//!
//! # Architecture
//!
//! ```text
//! tick(budget)
//!     │
//!     ├─► store.list_due(now, limit)        bounded scan, stale reads ok
//!     ├─► store.claim(id, owner, lease)     atomic, the authority
//!     ├─► registry.dispatch(ctx, payload)   user handler with deadline
//!     └─► store.finalize(id, owner, ..)     complete / retry / reschedule
//! ```
//!
//! Because the external trigger fires at minute cadence, a job whose
//! `next_run_at` falls between pulses can be delayed by up to one minute.
//! Callers that need tighter latency must drive ticks themselves.

pub mod api;
pub mod backoff;
pub mod clock;
pub mod cron;
pub mod error;
pub mod record;
pub mod registry;
pub mod store;
pub mod tick;

pub use api::{JobsApi, NewJob};
pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::CronExpr;
pub use error::SchedulerError;
pub use record::{CancelOutcome, JobRecord, JobStatus, Schedule, Transition};
pub use registry::{HandlerContext, HandlerRegistry};
pub use store::json::JsonJobStore;
pub use store::postgres::PgJobStore;
pub use store::{ClaimOutcome, FinalizeOutcome, JobFilter, JobStore};
pub use tick::{Scheduler, SchedulerConfig, TickBudget, TickReport};
