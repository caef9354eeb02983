//! Production backend: one JSONB document per job in Postgres.
//!
//! Every atomic operation opens a transaction, takes a row lock with
//! `SELECT ... FOR UPDATE`, lets the shared record logic decide, and
//! rewrites the document before committing. Concurrent claims on the same
//! id serialize on the row lock, so exactly one caller sees `Claimed` per
//! lease generation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ClaimOutcome, FinalizeOutcome, JobFilter, JobStore};
use crate::record::{CancelOutcome, JobRecord, Transition};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `scheduler_jobs` table and its due-scan index.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run scheduler migrations")?;
        Ok(())
    }

    /// Lock and load one record inside `tx`.
    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<JobRecord>> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM scheduler_jobs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        doc.map(|doc| serde_json::from_value(doc).context("corrupt job document"))
            .transpose()
    }

    /// Rewrite a locked record inside `tx`.
    async fn write_row(tx: &mut Transaction<'_, Postgres>, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET status = $2, next_run_at = $3, doc = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.next_run_at)
        .bind(serde_json::to_value(record)?)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn put(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs (id, status, next_run_at, doc, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                next_run_at = EXCLUDED.next_run_at,
                doc = EXCLUDED.doc,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.next_run_at)
        .bind(serde_json::to_value(record)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM scheduler_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        doc.map(|doc| serde_json::from_value(doc).context("corrupt job document"))
            .transpose()
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM scheduler_jobs
            WHERE (status = 'pending' AND next_run_at <= $1)
               OR (status = 'running' AND (doc->>'lease_until')::timestamptz < $1)
            ORDER BY next_run_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn claim(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = Self::lock_row(&mut tx, id).await? else {
            return Ok(ClaimOutcome::Lost);
        };
        if !record.try_claim(owner, now, lease_duration) {
            return Ok(ClaimOutcome::Lost);
        }
        Self::write_row(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(Box::new(record)))
    }

    async fn finalize(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        transition: Transition,
    ) -> Result<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = Self::lock_row(&mut tx, id).await? else {
            return Ok(FinalizeOutcome::Lost);
        };
        if record.lease_owner.as_deref() != Some(owner) {
            return Ok(FinalizeOutcome::Lost);
        }
        record.apply_transition(&transition, now);
        Self::write_row(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(FinalizeOutcome::Ok)
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = Self::lock_row(&mut tx, id).await? else {
            return Ok(CancelOutcome::NotFound);
        };
        let outcome = record.try_cancel(now);
        if outcome == CancelOutcome::Cancelled {
            Self::write_row(&mut tx, &record).await?;
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let docs: Vec<serde_json::Value> = sqlx::query_scalar(
            r#"
            SELECT doc FROM scheduler_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR doc->>'kind' = $2)
            ORDER BY next_run_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.as_deref())
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).context("corrupt job document"))
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{JobStatus, Schedule};

    async fn store() -> PgJobStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect to postgres");
        let store = PgJobStore::new(pool);
        store.migrate().await.expect("migrate");
        store
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL pointing at a scratch database
    async fn claim_finalize_and_lease_steal_round_trip() {
        let store = store().await;
        let now: DateTime<Utc> = "2030-01-01T00:00:00Z".parse().unwrap();

        let job = JobRecord::new(
            "noop",
            serde_json::json!({"n": 1}),
            Schedule::once(now),
            3,
            now,
        )
        .unwrap();
        store.put(&job).await.unwrap();

        // Due scan sees it, claim wins once.
        assert!(store.list_due(now, 10).await.unwrap().contains(&job.id));
        let ClaimOutcome::Claimed(claimed) = store
            .claim(job.id, "a", now, Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("first claim must win");
        };
        assert_eq!(claimed.attempts, 1);
        assert!(matches!(
            store.claim(job.id, "b", now, Duration::minutes(5)).await.unwrap(),
            ClaimOutcome::Lost
        ));

        // Non-owner finalize is rejected, owner finalize lands.
        assert_eq!(
            store
                .finalize(job.id, "b", now, Transition::Completed)
                .await
                .unwrap(),
            FinalizeOutcome::Lost
        );
        assert_eq!(
            store
                .finalize(job.id, "a", now, Transition::Completed)
                .await
                .unwrap(),
            FinalizeOutcome::Ok
        );
        let done = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        // Expired lease is recoverable by another owner.
        let mut crashed = JobRecord::new(
            "noop",
            serde_json::json!({}),
            Schedule::once(now),
            3,
            now,
        )
        .unwrap();
        crashed.try_claim("a", now - Duration::minutes(10), Duration::minutes(5));
        store.put(&crashed).await.unwrap();
        let ClaimOutcome::Claimed(stolen) = store
            .claim(crashed.id, "b", now, Duration::minutes(5))
            .await
            .unwrap()
        else {
            panic!("expired lease must be stealable");
        };
        assert_eq!(stolen.lease_owner.as_deref(), Some("b"));
        assert_eq!(stolen.attempts, 2);
    }
}
