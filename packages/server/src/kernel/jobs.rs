//! Built-in job kinds and the process-wide handler registry.
//!
//! Handlers are registered once at startup and must be idempotent: a
//! replica that crashes mid-delivery hands its lease to a peer, and the
//! peer runs the handler again.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use emonk_scheduler::{HandlerRegistry, JobFilter, JobStatus, JobsApi, NewJob, Schedule};

use super::traits::{BaseAI, BaseMemory, BaseNotifier};

pub const SEND_REMINDER_KIND: &str = "send_reminder";
pub const DAILY_DIGEST_KIND: &str = "daily_digest";

/// Cron line for the standing digest job, evaluated in the configured
/// timezone.
const DIGEST_CRON: &str = "0 9 * * *";

#[derive(Debug, Deserialize)]
struct ReminderPayload {
    message: String,
}

/// Build the registry of built-in job kinds.
pub fn build_registry(
    notifier: Arc<dyn BaseNotifier>,
    ai: Arc<dyn BaseAI>,
    memory: Arc<dyn BaseMemory>,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    let reminder_notifier = notifier.clone();
    registry.register::<ReminderPayload, _, _>(SEND_REMINDER_KIND, move |_ctx, payload| {
        let notifier = reminder_notifier.clone();
        async move {
            notifier
                .notify(&format!("Reminder: {}", payload.message))
                .await
        }
    });

    registry.register::<serde_json::Value, _, _>(DAILY_DIGEST_KIND, move |_ctx, _payload| {
        let notifier = notifier.clone();
        let ai = ai.clone();
        let memory = memory.clone();
        async move { run_daily_digest(&*notifier, &*ai, &*memory).await }
    });

    registry
}

/// Summarize stored facts and deliver the digest. Skipped quietly when
/// there is nothing to say.
async fn run_daily_digest(
    notifier: &dyn BaseNotifier,
    ai: &dyn BaseAI,
    memory: &dyn BaseMemory,
) -> Result<()> {
    let facts = memory.facts().await?;
    if facts.is_empty() {
        debug!("no stored facts, skipping digest");
        return Ok(());
    }

    let prompt = format!(
        "Write a two-sentence morning briefing for the user based on what \
         you know about them:\n{}",
        facts
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    );
    let digest = ai.complete(&prompt).await?;
    notifier.notify(&digest).await
}

/// Make sure the standing jobs exist; called once at startup. Idempotent
/// across replicas restarting at the same time only in effect, not in
/// record count — duplicates are harmless but avoided by the pending
/// check.
pub async fn ensure_default_jobs(jobs: &JobsApi, timezone: &str) -> Result<()> {
    let existing = jobs
        .list(&JobFilter {
            status: Some(JobStatus::Pending),
            kind: Some(DAILY_DIGEST_KIND.to_string()),
            limit: Some(1),
        })
        .await?;
    if !existing.is_empty() {
        return Ok(());
    }

    let record = jobs
        .schedule(NewJob {
            kind: DAILY_DIGEST_KIND.to_string(),
            payload: serde_json::json!({}),
            schedule: Schedule::cron(DIGEST_CRON, timezone),
            max_attempts: None,
        })
        .await?;
    tracing::info!(job_id = %record.id, "standing daily digest scheduled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{MockAI, MockMemory, MockNotifier};
    use emonk_scheduler::{Clock, HandlerContext, JsonJobStore, ManualClock};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(kind: &str) -> HandlerContext {
        HandlerContext {
            job_id: Uuid::new_v4(),
            kind: kind.to_string(),
            attempt: 1,
            deadline: "2030-01-01T00:05:00Z".parse().unwrap(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn send_reminder_delivers_through_the_notifier() {
        let notifier = Arc::new(MockNotifier::default());
        let registry = build_registry(
            notifier.clone(),
            Arc::new(MockAI::default()),
            Arc::new(MockMemory::default()),
        );

        registry
            .dispatch(
                ctx(SEND_REMINDER_KIND),
                serde_json::json!({"message": "stretch your legs"}),
            )
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent, vec!["Reminder: stretch your legs"]);
    }

    #[tokio::test]
    async fn digest_with_no_facts_sends_nothing() {
        let notifier = Arc::new(MockNotifier::default());
        let registry = build_registry(
            notifier.clone(),
            Arc::new(MockAI::default()),
            Arc::new(MockMemory::default()),
        );

        registry
            .dispatch(ctx(DAILY_DIGEST_KIND), serde_json::json!({}))
            .await
            .unwrap();
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn digest_summarizes_facts_via_the_ai() {
        let notifier = Arc::new(MockNotifier::default());
        let ai = Arc::new(MockAI::with_responses(vec![
            "Good morning! Tea is ready.".to_string(),
        ]));
        let memory = Arc::new(MockMemory::default());
        memory.store_fact("likes green tea").await.unwrap();

        let registry = build_registry(notifier.clone(), ai, memory);
        registry
            .dispatch(ctx(DAILY_DIGEST_KIND), serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(notifier.sent(), vec!["Good morning! Tea is ready."]);
    }

    #[tokio::test]
    async fn ensure_default_jobs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let memory: Arc<dyn BaseMemory> = Arc::new(MockMemory::default());
        let registry = Arc::new(build_registry(
            Arc::new(MockNotifier::default()),
            Arc::new(MockAI::default()),
            memory,
        ));
        let clock: Arc<dyn Clock> =
            Arc::new(ManualClock::new("2030-01-01T00:00:00Z".parse().unwrap()));
        let jobs = JobsApi::new(Arc::new(JsonJobStore::new(dir.path())), registry, clock, 3);

        ensure_default_jobs(&jobs, "UTC").await.unwrap();
        ensure_default_jobs(&jobs, "UTC").await.unwrap();

        let digests = jobs
            .list(&JobFilter {
                kind: Some(DAILY_DIGEST_KIND.to_string()),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(digests.len(), 1);
    }
}
