//! Programmatic job surface used by chat skills, startup code, and the
//! operator CLI.
//!
//! Validation happens here, synchronously, before anything touches the
//! store: unknown kinds and malformed schedules are precondition errors
//! and are never persisted.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::record::{CancelOutcome, JobRecord, Schedule};
use crate::registry::HandlerRegistry;
use crate::store::{JobFilter, JobStore};

/// A job to be scheduled.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub payload: serde_json::Value,
    pub schedule: Schedule,
    /// Falls back to the API default when absent.
    pub max_attempts: Option<i32>,
}

pub struct JobsApi {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    default_max_attempts: i32,
}

impl JobsApi {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        default_max_attempts: i32,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            default_max_attempts,
        }
    }

    /// Validate and persist a pending record; returns it with the first
    /// fire computed.
    pub async fn schedule(&self, new_job: NewJob) -> Result<JobRecord, SchedulerError> {
        if !self.registry.contains(&new_job.kind) {
            return Err(SchedulerError::UnknownKind(new_job.kind));
        }
        let record = JobRecord::new(
            new_job.kind,
            new_job.payload,
            new_job.schedule,
            new_job.max_attempts.unwrap_or(self.default_max_attempts),
            self.clock.now(),
        )?;
        self.store.put(&record).await?;
        info!(
            job_id = %record.id,
            kind = %record.kind,
            next_run_at = %record.next_run_at,
            "job scheduled"
        );
        Ok(record)
    }

    /// Cancel a pending job. Running jobs are left to finish; terminal
    /// jobs are reported as such.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, SchedulerError> {
        let outcome = self.store.cancel(id, self.clock.now()).await?;
        if outcome == CancelOutcome::Cancelled {
            info!(job_id = %id, "job cancelled");
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, SchedulerError> {
        Ok(self.store.get(id).await?)
    }

    /// Read-only listing for operator inspection.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, SchedulerError> {
        Ok(self.store.list(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::JobStatus;
    use crate::store::json::JsonJobStore;
    use chrono::{DateTime, Duration, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn api_with(dir: &std::path::Path, now: DateTime<Utc>) -> JobsApi {
        let mut registry = HandlerRegistry::new();
        registry.register::<serde_json::Value, _, _>("noop", |_ctx, _p| async { Ok(()) });
        JobsApi::new(
            Arc::new(JsonJobStore::new(dir)),
            Arc::new(registry),
            Arc::new(ManualClock::new(now)),
            3,
        )
    }

    #[tokio::test]
    async fn schedule_writes_a_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T00:00:00Z");
        let api = api_with(dir.path(), now);

        let record = api
            .schedule(NewJob {
                kind: "noop".to_string(),
                payload: serde_json::json!({"note": "hi"}),
                schedule: Schedule::once(utc("2030-01-02T00:00:00Z")),
                max_attempts: None,
            })
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.next_run_at, utc("2030-01-02T00:00:00Z"));

        let stored = api.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T00:00:00Z");
        let api = api_with(dir.path(), now);

        let err = api
            .schedule(NewJob {
                kind: "ghost".to_string(),
                payload: serde_json::Value::Null,
                schedule: Schedule::once(now),
                max_attempts: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownKind(_)));

        assert!(api.list(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_cron_is_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T00:00:00Z");
        let api = api_with(dir.path(), now);

        let err = api
            .schedule(NewJob {
                kind: "noop".to_string(),
                payload: serde_json::Value::Null,
                schedule: Schedule::cron("not a cron", "UTC"),
                max_attempts: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(api.list(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cron_schedule_gets_its_first_fire_computed() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T12:03:00Z");
        let api = api_with(dir.path(), now);

        let record = api
            .schedule(NewJob {
                kind: "noop".to_string(),
                payload: serde_json::Value::Null,
                schedule: Schedule::cron("*/5 * * * *", "UTC"),
                max_attempts: None,
            })
            .await
            .unwrap();
        assert_eq!(record.next_run_at, utc("2030-01-01T12:05:00Z"));
    }

    #[tokio::test]
    async fn every_schedule_first_fires_one_interval_out() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T00:00:00Z");
        let api = api_with(dir.path(), now);

        let record = api
            .schedule(NewJob {
                kind: "noop".to_string(),
                payload: serde_json::Value::Null,
                schedule: Schedule::every(Duration::minutes(30)),
                max_attempts: None,
            })
            .await
            .unwrap();
        assert_eq!(record.next_run_at, now + Duration::minutes(30));
    }

    #[tokio::test]
    async fn cancel_reports_each_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let now = utc("2030-01-01T00:00:00Z");
        let api = api_with(dir.path(), now);

        let record = api
            .schedule(NewJob {
                kind: "noop".to_string(),
                payload: serde_json::Value::Null,
                schedule: Schedule::once(now),
                max_attempts: None,
            })
            .await
            .unwrap();

        assert_eq!(api.cancel(record.id).await.unwrap(), CancelOutcome::Cancelled);
        assert_eq!(
            api.cancel(record.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
        assert_eq!(
            api.cancel(Uuid::new_v4()).await.unwrap(),
            CancelOutcome::NotFound
        );
    }
}
