//! One tick: bounded scan, in-order claims, supervised execution,
//! deterministic finalization.
//!
//! The scheduler owns no background task. An external pulse calls
//! [`Scheduler::tick`]; everything the tick does is bounded by its budget
//! and by the per-tick concurrency limit. Per-job faults never fail the
//! tick — they are tallied into the [`TickReport`]. Only a global
//! precondition failure (the store being unreachable for the initial
//! scan) surfaces as an error.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::record::{JobRecord, Transition};
use crate::registry::{DispatchError, HandlerContext, HandlerRegistry};
use crate::store::{ClaimOutcome, FinalizeOutcome, JobStore};

/// Default floor for every lease regardless of handler timeouts.
const DEFAULT_LEASE_FLOOR: StdDuration = StdDuration::from_secs(300);

/// Subtracted from `lease_until` to form the handler deadline, leaving
/// room to finalize before the lease can be stolen.
const SAFETY_MARGIN: StdDuration = StdDuration::from_secs(10);

/// Bounded retries for finalize writes on transport errors.
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_RETRY_DELAY: StdDuration = StdDuration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Lease attribution for this replica; need not survive restarts.
    pub owner_id: String,
    /// Parallel executions per tick.
    pub concurrency: usize,
    /// Execution timeout for kinds without a registry override.
    pub handler_timeout: StdDuration,
    /// Minimum lease length; handler timeouts can only stretch it.
    pub lease_floor: StdDuration,
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            owner_id: format!("replica-{}", Uuid::new_v4()),
            concurrency: 8,
            handler_timeout: StdDuration::from_secs(60),
            lease_floor: DEFAULT_LEASE_FLOOR,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Caps on a single tick.
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    pub max_jobs: usize,
    pub max_duration: StdDuration,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            max_jobs: 100,
            max_duration: StdDuration::from_secs(60),
        }
    }
}

/// Per-tick outcome summary, returned to the tick endpoint for
/// observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub checked: u32,
    pub claimed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub retried: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub owner_id: String,
}

/// What one supervised execution amounted to.
enum ExecOutcome {
    Succeeded,
    Retried,
    FailedTerminal,
    /// The lease was stolen before finalize; nothing was written.
    LostLease,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// `max(1.5 × slowest handler timeout, lease floor)`, fixed at
    /// construction since the registry is immutable after startup.
    lease_duration: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        if config.concurrency == 0 {
            return Err(SchedulerError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if config.owner_id.is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "owner_id must not be empty".to_string(),
            ));
        }

        let slowest = registry
            .kinds()
            .iter()
            .filter_map(|kind| registry.timeout_for(kind))
            .chain(std::iter::once(config.handler_timeout))
            .max()
            .unwrap_or(config.handler_timeout);
        let lease = slowest.mul_f64(1.5).max(config.lease_floor);
        let lease_duration = Duration::from_std(lease)
            .map_err(|_| SchedulerError::InvalidConfig("handler timeout too large".to_string()))?;

        Ok(Self {
            store,
            registry,
            clock,
            config,
            lease_duration,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.config.owner_id
    }

    /// Run one scan-claim-execute-finalize cycle.
    pub async fn tick(&self, budget: TickBudget) -> Result<TickReport, SchedulerError> {
        let started = Instant::now();
        let now = self.clock.now();

        let candidates = self
            .store
            .list_due(now, budget.max_jobs)
            .await
            .map_err(SchedulerError::Store)?;

        let mut report = TickReport {
            owner_id: self.config.owner_id.clone(),
            ..TickReport::default()
        };
        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();

        for id in candidates {
            if started.elapsed() >= budget.max_duration {
                debug!(owner_id = %self.config.owner_id, "tick budget exhausted, stopping scan");
                break;
            }
            report.checked += 1;

            // Keep the pool bounded before issuing the next claim; claims
            // stay strictly in list_due order.
            while in_flight.len() >= self.config.concurrency {
                if let Some(outcome) = in_flight.next().await {
                    tally(&mut report, outcome);
                }
            }

            let claim_now = self.clock.now();
            match self
                .store
                .claim(id, &self.config.owner_id, claim_now, self.lease_duration)
                .await
            {
                Ok(ClaimOutcome::Claimed(record)) => {
                    report.claimed += 1;
                    in_flight.push(self.execute(*record, claim_now));
                }
                Ok(ClaimOutcome::Lost) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    // One flaky claim must not fail the whole tick.
                    warn!(job_id = %id, error = %e, "claim failed, skipping");
                    report.skipped += 1;
                }
            }
        }

        while let Some(outcome) = in_flight.next().await {
            tally(&mut report, outcome);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            owner_id = %self.config.owner_id,
            checked = report.checked,
            claimed = report.claimed,
            succeeded = report.succeeded,
            failed = report.failed,
            retried = report.retried,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "tick complete"
        );
        Ok(report)
    }

    /// Execute one claimed job and finalize it.
    async fn execute(&self, record: JobRecord, started_at: DateTime<Utc>) -> ExecOutcome {
        let job_id = record.id;
        let kind = record.kind.clone();
        let lease_until = record
            .lease_until
            .unwrap_or(started_at + self.lease_duration);

        // The lease bounds the deadline; a per-kind timeout can only
        // tighten it.
        let margin = Duration::from_std(SAFETY_MARGIN).unwrap_or_else(|_| Duration::seconds(10));
        let kind_timeout = self
            .registry
            .timeout_for(&kind)
            .unwrap_or(self.config.handler_timeout);
        let kind_deadline = started_at
            + Duration::from_std(kind_timeout).unwrap_or_else(|_| Duration::seconds(60));
        let deadline = (lease_until - margin).min(kind_deadline);

        let cancellation = CancellationToken::new();
        let ctx = HandlerContext {
            job_id,
            kind: kind.clone(),
            attempt: record.attempts,
            deadline,
            cancellation: cancellation.clone(),
        };

        let allowed = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);

        // Run the handler in its own task so a panic is contained.
        let registry = self.registry.clone();
        let payload = record.payload.clone();
        let handle = tokio::spawn(async move { registry.dispatch(ctx, payload).await });

        let transition = match tokio::time::timeout(allowed, handle).await {
            Ok(Ok(Ok(()))) => {
                debug!(job_id = %job_id, kind = %kind, "job succeeded");
                self.success_transition(&record, started_at)
            }
            Ok(Ok(Err(DispatchError::UnknownKind))) => {
                warn!(job_id = %job_id, kind = %kind, "no handler registered");
                Transition::FailedTerminal {
                    error: "unknown kind".to_string(),
                }
            }
            Ok(Ok(Err(DispatchError::Handler(e)))) => {
                warn!(job_id = %job_id, kind = %kind, error = %e, "job failed");
                self.failure_transition(&record, e.to_string())
            }
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "handler panicked"
                } else {
                    "handler task cancelled"
                };
                error!(job_id = %job_id, kind = %kind, "{}", reason);
                self.failure_transition(&record, reason.to_string())
            }
            Err(_elapsed) => {
                // Signal the (possibly still running) handler and move on;
                // if it overruns the lease a peer may re-execute it.
                cancellation.cancel();
                warn!(job_id = %job_id, kind = %kind, "job deadline exceeded");
                self.failure_transition(&record, "timeout".to_string())
            }
        };

        let exec_outcome = match &transition {
            Transition::Completed | Transition::Rescheduled { .. } => ExecOutcome::Succeeded,
            Transition::FailedRetry { .. } => ExecOutcome::Retried,
            Transition::FailedTerminal { .. } => ExecOutcome::FailedTerminal,
        };

        match self.finalize_with_retry(job_id, transition).await {
            FinalizeOutcome::Ok => exec_outcome,
            FinalizeOutcome::Lost => {
                info!(job_id = %job_id, kind = %kind, "lease was stolen before finalize");
                ExecOutcome::LostLease
            }
        }
    }

    /// Completion for one-shots, advance for recurring schedules.
    fn success_transition(&self, record: &JobRecord, started_at: DateTime<Utc>) -> Transition {
        if !record.schedule.is_recurring() {
            return Transition::Completed;
        }
        match record.schedule.next_fire_after(started_at) {
            Ok(Some(next_run_at)) => Transition::Rescheduled { next_run_at },
            Ok(None) => {
                warn!(job_id = %record.id, "recurring schedule has no further fire, completing");
                Transition::Completed
            }
            Err(e) => {
                // Schedules are validated before they reach the store.
                error!(job_id = %record.id, error = %e, "stored schedule no longer evaluates");
                Transition::Completed
            }
        }
    }

    /// Retry with backoff while the attempt budget lasts, then terminal.
    fn failure_transition(&self, record: &JobRecord, error: String) -> Transition {
        if record.attempts < record.max_attempts {
            let delay = self.config.backoff.delay(record.attempts);
            Transition::FailedRetry {
                error,
                next_run_at: self.clock.now() + delay,
            }
        } else {
            Transition::FailedTerminal { error }
        }
    }

    /// Finalize with short bounded retries on transport errors. A `Lost`
    /// outcome is never retried — the owner check already decided.
    async fn finalize_with_retry(&self, job_id: Uuid, transition: Transition) -> FinalizeOutcome {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self
                .store
                .finalize(job_id, &self.config.owner_id, self.clock.now(), transition.clone())
                .await
            {
                Ok(outcome) => return outcome,
                Err(e) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(job_id = %job_id, attempt, error = %e, "finalize failed, retrying");
                    tokio::time::sleep(FINALIZE_RETRY_DELAY).await;
                }
                Err(e) => {
                    // The lease will expire and another replica will
                    // re-run the job; at-least-once holds.
                    error!(job_id = %job_id, error = %e, "finalize failed, giving up");
                    return FinalizeOutcome::Lost;
                }
            }
        }
        FinalizeOutcome::Lost
    }
}

fn tally(report: &mut TickReport, outcome: ExecOutcome) {
    match outcome {
        ExecOutcome::Succeeded => report.succeeded += 1,
        ExecOutcome::Retried => report.retried += 1,
        ExecOutcome::FailedTerminal => report.failed += 1,
        ExecOutcome::LostLease => {}
    }
}
