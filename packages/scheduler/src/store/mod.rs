//! Storage contract for job records.
//!
//! One atomic primitive — `claim` — is strong enough to serialize all
//! execution across replicas; `finalize` and `cancel` reuse the same
//! atomicity. `list_due` is a stale-read scan: claim is the authority.
//!
//! Two backends implement the contract: [`json::JsonJobStore`] for
//! single-process development and [`postgres::PgJobStore`] for
//! production. The decision logic for every mutation lives on
//! [`JobRecord`](crate::record::JobRecord) so the backends cannot drift.

pub mod json;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::record::{CancelOutcome, JobRecord, JobStatus, Transition};

/// Result of an atomic claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The caller now owns the lease; the returned record reflects it.
    Claimed(Box<JobRecord>),
    /// Someone else holds the job, or it is no longer claimable.
    Lost,
}

/// Result of an atomic finalize attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Ok,
    /// The lease was stolen (or the job vanished); nothing was written.
    Lost,
}

/// Read-only filter for operator inspection.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

/// Durable storage of job records.
///
/// Transport errors propagate as `anyhow::Error`; contention never does —
/// it is expressed through `Lost` outcomes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create or fully replace a record. Used by the job API and by
    /// nothing else; execution paths go through `claim`/`finalize`.
    async fn put(&self, record: &JobRecord) -> Result<()>;

    /// Point read.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Up to `limit` claimable ids ascending by `next_run_at`: pending
    /// records with `next_run_at <= now`, plus running records whose lease
    /// has expired (so crashed executions get resurfaced). No locking;
    /// results may be stale by the time the caller claims them.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>>;

    /// Atomically claim a job for `owner` with a lease of
    /// `lease_duration`, recovering expired leases from crashed owners.
    async fn claim(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<ClaimOutcome>;

    /// Atomically apply `transition` if `owner` still holds the lease.
    async fn finalize(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        transition: Transition,
    ) -> Result<FinalizeOutcome>;

    /// Atomic `pending → cancelled`. Needed as a store primitive so a
    /// cancel racing a claim resolves to exactly one winner.
    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome>;

    /// Read-only listing for operators.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<()>;
}

pub(crate) fn matches_filter(record: &JobRecord, filter: &JobFilter) -> bool {
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }
    if let Some(kind) = &filter.kind {
        if &record.kind != kind {
            return false;
        }
    }
    true
}
