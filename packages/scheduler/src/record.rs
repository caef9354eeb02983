//! The durable job record and its lifecycle transitions.
//!
//! The record is the only shared mutable state in the system. Every
//! mutation is decided by the pure methods here and made durable by a store
//! backend inside that backend's atomic primitive, so both backends agree
//! on semantics by construction.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::cron::CronExpr;
use crate::error::SchedulerError;

/// `last_error` is kept short; handler errors can embed entire responses.
const MAX_ERROR_LEN: usize = 500;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never claimed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// When a job becomes due: once at an instant, on a cron expression in a
/// timezone, or at a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    At { at: DateTime<Utc> },
    Cron { expr: String, tz: String },
    Every { seconds: u64 },
}

impl Schedule {
    pub fn once(at: DateTime<Utc>) -> Self {
        Self::At { at }
    }

    pub fn cron(expr: impl Into<String>, tz: impl Into<String>) -> Self {
        Self::Cron {
            expr: expr.into(),
            tz: tz.into(),
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self::Every {
            seconds: interval.num_seconds().max(0) as u64,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::At { .. })
    }

    /// Reject malformed expressions, unknown timezones, and zero intervals
    /// before anything reaches the store.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::At { .. } => Ok(()),
            Self::Cron { expr, tz } => {
                CronExpr::parse(expr)?;
                parse_tz(tz)?;
                Ok(())
            }
            Self::Every { seconds } => {
                if *seconds == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be at least one second".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// The first `next_run_at` for a freshly scheduled job.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
        match self {
            Self::At { at } => Ok(*at),
            Self::Cron { expr, tz } => {
                let expr = CronExpr::parse(expr)?;
                expr.next_after(now, parse_tz(tz)?).ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!(
                        "cron expression {} has no reachable fire",
                        expr
                    ))
                })
            }
            Self::Every { seconds } => Ok(now + Duration::seconds(*seconds as i64)),
        }
    }

    /// The fire strictly after a successful execution that began at
    /// `start`. `None` for one-shot schedules, and for cron expressions
    /// whose next fire lies beyond the search horizon.
    pub fn next_fire_after(
        &self,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        match self {
            Self::At { .. } => Ok(None),
            Self::Cron { expr, tz } => {
                let expr = CronExpr::parse(expr)?;
                Ok(expr.next_after(start, parse_tz(tz)?))
            }
            Self::Every { seconds } => Ok(Some(start + Duration::seconds(*seconds as i64))),
        }
    }
}

fn parse_tz(tz: &str) -> Result<Tz, SchedulerError> {
    tz.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("unknown timezone {:?}", tz)))
}

// ============================================================================
// Transitions
// ============================================================================

/// Finalization applied after an execution attempt, decided by the tick
/// loop and made durable by the store under the owner check.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// One-shot job finished.
    Completed,
    /// Attempt budget exhausted.
    FailedTerminal { error: String },
    /// Transient failure; job re-enters pending at a backed-off time.
    FailedRetry {
        error: String,
        next_run_at: DateTime<Utc>,
    },
    /// Recurring job succeeded; advance to the next fire.
    Rescheduled { next_run_at: DateTime<Utc> },
}

/// Result of asking a record to cancel itself. Stores add `NotFound` on
/// top when the id does not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    AlreadyTerminal,
    Running,
}

// ============================================================================
// Record
// ============================================================================

/// The sole durable entity: one row/document per scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobRecord {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// Selects the handler in the registry.
    pub kind: String,

    /// Opaque handler input.
    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    pub schedule: Schedule,

    /// Earliest moment the job may be claimed.
    pub next_run_at: DateTime<Utc>,

    #[builder(default)]
    pub status: JobStatus,

    /// Prior execution count, including failures.
    #[builder(default = 0)]
    pub attempts: i32,

    #[builder(default = 3)]
    pub max_attempts: i32,

    // Lease: set together with the running status, never separately.
    #[builder(default, setter(strip_option))]
    pub lease_owner: Option<String>,
    #[builder(default, setter(strip_option))]
    pub lease_until: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Validate and build a pending record with its first fire computed.
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        schedule: Schedule,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        schedule.validate()?;
        if max_attempts < 1 {
            return Err(SchedulerError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let next_run_at = schedule.first_fire(now)?;
        Ok(Self::builder()
            .kind(kind.into())
            .payload(payload)
            .schedule(schedule)
            .next_run_at(next_run_at)
            .created_at(now)
            .updated_at(now)
            .max_attempts(max_attempts)
            .build())
    }

    /// Whether `list_due` should surface this record.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run_at <= now
    }

    /// Running with an expired lease: the owner crashed or overran and the
    /// scan must resurface the job so a claim can recover it.
    pub fn needs_recovery(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running && self.lease_until.map_or(true, |until| until < now)
    }

    /// The claim decision: pending jobs and running jobs whose lease has
    /// expired are claimable; everything else loses. On success the record
    /// is re-leased to `owner` and the attempt counter advances.
    pub fn try_claim(&mut self, owner: &str, now: DateTime<Utc>, lease: Duration) -> bool {
        let claimable = match self.status {
            JobStatus::Pending => true,
            // Expired lease: the previous owner crashed or overran.
            JobStatus::Running => self.lease_until.map_or(true, |until| until < now),
            _ => false,
        };
        if !claimable {
            return false;
        }
        self.status = JobStatus::Running;
        self.lease_owner = Some(owner.to_string());
        self.lease_until = Some(now + lease);
        self.attempts += 1;
        self.updated_at = now;
        true
    }

    /// Only pending jobs can be cancelled; a running execution is left to
    /// finish and observe its deadline.
    pub fn try_cancel(&mut self, now: DateTime<Utc>) -> CancelOutcome {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Cancelled;
                self.updated_at = now;
                CancelOutcome::Cancelled
            }
            JobStatus::Running => CancelOutcome::Running,
            _ => CancelOutcome::AlreadyTerminal,
        }
    }

    /// Apply a finalization, clearing the lease. Callers must have
    /// verified lease ownership first.
    pub fn apply_transition(&mut self, transition: &Transition, now: DateTime<Utc>) {
        match transition {
            Transition::Completed => {
                self.status = JobStatus::Completed;
            }
            Transition::FailedTerminal { error } => {
                self.status = JobStatus::Failed;
                self.last_error = Some(truncate_error(error));
            }
            Transition::FailedRetry { error, next_run_at } => {
                self.status = JobStatus::Pending;
                self.last_error = Some(truncate_error(error));
                self.next_run_at = *next_run_at;
            }
            Transition::Rescheduled { next_run_at } => {
                self.status = JobStatus::Pending;
                self.attempts = 0;
                self.last_error = None;
                self.next_run_at = *next_run_at;
            }
        }
        self.lease_owner = None;
        self.lease_until = None;
        self.updated_at = now;
    }
}

fn truncate_error(error: &str) -> String {
    if error.len() <= MAX_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_ERROR_LEN).collect()
    }
}
