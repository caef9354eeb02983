//! Development backend: one `jobs.json` file, rewritten atomically.
//!
//! Every atomic operation holds one coarse async mutex for its whole
//! read-decide-write cycle and lands the result with write-to-temp +
//! rename. Adequate for a single process and for tests; two processes
//! sharing the file would race each other — production uses the document
//! backend instead, enforced at configuration time.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{matches_filter, ClaimOutcome, FinalizeOutcome, JobFilter, JobStore};
use crate::record::{CancelOutcome, JobRecord, Transition};

const JOBS_FILE: &str = "jobs.json";

pub struct JsonJobStore {
    dir: PathBuf,
    // One writer at a time; this is the file lock of the backend.
    lock: Mutex<()>,
}

impl JsonJobStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: data_dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn jobs_path(&self) -> PathBuf {
        self.dir.join(JOBS_FILE)
    }

    async fn load(&self) -> Result<Vec<JobRecord>> {
        let path = self.jobs_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt job file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn save(&self, records: &[JobRecord]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {}", self.dir.display()))?;

        let path = self.jobs_path();
        let tmp = self.dir.join(format!("{}.tmp", JOBS_FILE));
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("rename {} into place", tmp.display()))?;
        Ok(())
    }

    /// Run one atomic read-decide-write cycle under the store lock. The
    /// closure returns its outcome and whether the records changed.
    async fn with_records<T>(
        &self,
        op: impl FnOnce(&mut Vec<JobRecord>) -> (T, bool),
    ) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let (outcome, dirty) = op(&mut records);
        if dirty {
            self.save(&records).await?;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl JobStore for JsonJobStore {
    async fn put(&self, record: &JobRecord) -> Result<()> {
        let record = record.clone();
        self.with_records(move |records| {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            ((), true)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let records = self.load().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let records = self.load().await?;
        let mut due: Vec<&JobRecord> = records
            .iter()
            .filter(|r| r.is_due(now) || r.needs_recovery(now))
            .collect();
        due.sort_by_key(|r| (r.next_run_at, r.id));
        Ok(due.into_iter().take(limit).map(|r| r.id).collect())
    }

    async fn claim(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<ClaimOutcome> {
        let owner = owner.to_string();
        self.with_records(move |records| {
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return (ClaimOutcome::Lost, false);
            };
            if record.try_claim(&owner, now, lease_duration) {
                (ClaimOutcome::Claimed(Box::new(record.clone())), true)
            } else {
                (ClaimOutcome::Lost, false)
            }
        })
        .await
    }

    async fn finalize(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
        transition: Transition,
    ) -> Result<FinalizeOutcome> {
        let owner = owner.to_string();
        self.with_records(move |records| {
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return (FinalizeOutcome::Lost, false);
            };
            if record.lease_owner.as_deref() != Some(owner.as_str()) {
                return (FinalizeOutcome::Lost, false);
            }
            record.apply_transition(&transition, now);
            (FinalizeOutcome::Ok, true)
        })
        .await
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        self.with_records(move |records| {
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return (CancelOutcome::NotFound, false);
            };
            let outcome = record.try_cancel(now);
            (outcome, outcome == CancelOutcome::Cancelled)
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let records = self.load().await?;
        let mut matched: Vec<JobRecord> = records
            .into_iter()
            .filter(|r| matches_filter(r, filter))
            .collect();
        matched.sort_by_key(|r| (r.next_run_at, r.id));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn ping(&self) -> Result<()> {
        self.load().await.map(|_| ())
    }
}
