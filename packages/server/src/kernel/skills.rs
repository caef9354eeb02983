//! Discoverable skills the LLM can invoke on behalf of the user.
//!
//! Each skill declares a name, a one-line description, and an example
//! argument object; the catalog is rendered into the chat prompt and the
//! model answers with `{skill, args}` when it wants one executed. Skills
//! hold exactly the dependencies they need and return a short
//! user-facing confirmation string.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use emonk_scheduler::{
    CancelOutcome, JobFilter, JobStatus, JobsApi, NewJob, Schedule,
};

use super::jobs::SEND_REMINDER_KIND;
use super::traits::BaseMemory;

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Example argument object shown to the LLM.
    fn args_example(&self) -> serde_json::Value;
    async fn execute(&self, args: serde_json::Value) -> Result<String>;
}

/// The discoverable set of skills, fixed at startup.
#[derive(Clone, Default)]
pub struct SkillSet {
    skills: Vec<Arc<dyn Skill>>,
}

impl SkillSet {
    pub fn new(skills: Vec<Arc<dyn Skill>>) -> Self {
        Self { skills }
    }

    /// The built-in skills: reminders and fact memory.
    pub fn builtin(
        jobs: Arc<JobsApi>,
        memory: Arc<dyn BaseMemory>,
        default_timezone: String,
    ) -> Self {
        Self::new(vec![
            Arc::new(ScheduleReminderSkill {
                jobs: jobs.clone(),
                default_timezone,
            }),
            Arc::new(CancelReminderSkill { jobs: jobs.clone() }),
            Arc::new(ListRemindersSkill { jobs }),
            Arc::new(RememberFactSkill { memory }),
        ])
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.iter().find(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.skills.iter().map(|s| s.name()).collect()
    }

    /// Render the catalog for the chat prompt.
    pub fn catalog(&self) -> String {
        self.skills
            .iter()
            .map(|s| {
                format!(
                    "- {}: {} (args example: {})",
                    s.name(),
                    s.description(),
                    s.args_example()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// schedule_reminder
// =============================================================================

#[derive(Debug, Deserialize)]
struct ScheduleReminderArgs {
    message: String,
    /// RFC 3339 instant for a one-shot reminder.
    #[serde(default)]
    at: Option<DateTime<Utc>>,
    /// Interval in minutes for a repeating reminder.
    #[serde(default)]
    every_minutes: Option<u32>,
    /// Five-field cron expression for calendar-shaped repetition.
    #[serde(default)]
    cron: Option<String>,
    /// IANA timezone for `cron`; defaults to the server timezone.
    #[serde(default)]
    timezone: Option<String>,
}

pub struct ScheduleReminderSkill {
    jobs: Arc<JobsApi>,
    default_timezone: String,
}

#[async_trait]
impl Skill for ScheduleReminderSkill {
    fn name(&self) -> &'static str {
        "schedule_reminder"
    }

    fn description(&self) -> &'static str {
        "Schedule a reminder to be delivered once at a time, every N minutes, or on a cron expression"
    }

    fn args_example(&self) -> serde_json::Value {
        serde_json::json!({"message": "water the plants", "cron": "0 9 * * FRI"})
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: ScheduleReminderArgs =
            serde_json::from_value(args).context("invalid schedule_reminder arguments")?;

        let schedule = match (args.at, args.every_minutes, args.cron) {
            (Some(at), None, None) => Schedule::once(at),
            (None, Some(minutes), None) => Schedule::every(Duration::minutes(minutes as i64)),
            (None, None, Some(expr)) => Schedule::cron(
                expr,
                args.timezone
                    .unwrap_or_else(|| self.default_timezone.clone()),
            ),
            _ => {
                return Err(anyhow!(
                    "exactly one of at, every_minutes, or cron must be given"
                ))
            }
        };

        let record = self
            .jobs
            .schedule(NewJob {
                kind: SEND_REMINDER_KIND.to_string(),
                payload: serde_json::json!({ "message": args.message }),
                schedule,
                max_attempts: None,
            })
            .await?;

        Ok(format!(
            "Reminder {} scheduled; first delivery at {}.",
            record.id,
            record.next_run_at.format("%Y-%m-%d %H:%M UTC")
        ))
    }
}

// =============================================================================
// cancel_reminder
// =============================================================================

#[derive(Debug, Deserialize)]
struct CancelReminderArgs {
    id: Uuid,
}

pub struct CancelReminderSkill {
    jobs: Arc<JobsApi>,
}

#[async_trait]
impl Skill for CancelReminderSkill {
    fn name(&self) -> &'static str {
        "cancel_reminder"
    }

    fn description(&self) -> &'static str {
        "Cancel a pending reminder by its id"
    }

    fn args_example(&self) -> serde_json::Value {
        serde_json::json!({"id": "00000000-0000-0000-0000-000000000000"})
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: CancelReminderArgs =
            serde_json::from_value(args).context("invalid cancel_reminder arguments")?;

        let message = match self.jobs.cancel(args.id).await? {
            CancelOutcome::Cancelled => format!("Reminder {} cancelled.", args.id),
            CancelOutcome::NotFound => format!("No reminder with id {}.", args.id),
            CancelOutcome::AlreadyTerminal => {
                format!("Reminder {} already finished.", args.id)
            }
            CancelOutcome::Running => format!(
                "Reminder {} is being delivered right now and can't be cancelled.",
                args.id
            ),
        };
        Ok(message)
    }
}

// =============================================================================
// list_reminders
// =============================================================================

pub struct ListRemindersSkill {
    jobs: Arc<JobsApi>,
}

#[async_trait]
impl Skill for ListRemindersSkill {
    fn name(&self) -> &'static str {
        "list_reminders"
    }

    fn description(&self) -> &'static str {
        "List pending reminders with their next delivery time"
    }

    fn args_example(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<String> {
        let pending = self
            .jobs
            .list(&JobFilter {
                status: Some(JobStatus::Pending),
                kind: Some(SEND_REMINDER_KIND.to_string()),
                limit: Some(20),
            })
            .await?;

        if pending.is_empty() {
            return Ok("No pending reminders.".to_string());
        }

        let lines: Vec<String> = pending
            .iter()
            .map(|r| {
                let message = r
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("(no message)");
                format!(
                    "- {} at {}: {}",
                    r.id,
                    r.next_run_at.format("%Y-%m-%d %H:%M UTC"),
                    message
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

// =============================================================================
// remember_fact
// =============================================================================

#[derive(Debug, Deserialize)]
struct RememberFactArgs {
    fact: String,
}

pub struct RememberFactSkill {
    memory: Arc<dyn BaseMemory>,
}

#[async_trait]
impl Skill for RememberFactSkill {
    fn name(&self) -> &'static str {
        "remember_fact"
    }

    fn description(&self) -> &'static str {
        "Store a durable fact about the user for later conversations"
    }

    fn args_example(&self) -> serde_json::Value {
        serde_json::json!({"fact": "allergic to peanuts"})
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: RememberFactArgs =
            serde_json::from_value(args).context("invalid remember_fact arguments")?;
        self.memory.store_fact(&args.fact).await?;
        Ok("Noted.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::build_registry;
    use crate::kernel::test_dependencies::{MockAI, MockNotifier, MockMemory};
    use emonk_scheduler::{Clock, JsonJobStore, ManualClock};

    fn test_jobs(dir: &std::path::Path) -> Arc<JobsApi> {
        let memory: Arc<dyn BaseMemory> = Arc::new(MockMemory::default());
        let registry = Arc::new(build_registry(
            Arc::new(MockNotifier::default()),
            Arc::new(MockAI::default()),
            memory,
        ));
        let clock: Arc<dyn Clock> =
            Arc::new(ManualClock::new("2030-01-01T00:00:00Z".parse().unwrap()));
        Arc::new(JobsApi::new(
            Arc::new(JsonJobStore::new(dir)),
            registry,
            clock,
            3,
        ))
    }

    #[tokio::test]
    async fn schedule_reminder_creates_a_pending_job() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = test_jobs(dir.path());
        let skill = ScheduleReminderSkill {
            jobs: jobs.clone(),
            default_timezone: "UTC".to_string(),
        };

        let reply = skill
            .execute(serde_json::json!({
                "message": "stand-up",
                "cron": "0 9 * * MON"
            }))
            .await
            .unwrap();
        assert!(reply.contains("scheduled"));

        let pending = jobs.list(&JobFilter::default()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, SEND_REMINDER_KIND);
        assert_eq!(pending[0].payload["message"], "stand-up");
    }

    #[tokio::test]
    async fn schedule_reminder_requires_exactly_one_schedule_form() {
        let dir = tempfile::tempdir().unwrap();
        let skill = ScheduleReminderSkill {
            jobs: test_jobs(dir.path()),
            default_timezone: "UTC".to_string(),
        };

        assert!(skill
            .execute(serde_json::json!({"message": "x"}))
            .await
            .is_err());
        assert!(skill
            .execute(serde_json::json!({
                "message": "x",
                "at": "2030-06-01T00:00:00Z",
                "every_minutes": 5
            }))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn cancel_reminder_reports_missing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let skill = CancelReminderSkill {
            jobs: test_jobs(dir.path()),
        };

        let reply = skill
            .execute(serde_json::json!({"id": Uuid::new_v4()}))
            .await
            .unwrap();
        assert!(reply.contains("No reminder"));
    }

    #[tokio::test]
    async fn list_reminders_formats_pending_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = test_jobs(dir.path());

        let schedule = ScheduleReminderSkill {
            jobs: jobs.clone(),
            default_timezone: "UTC".to_string(),
        };
        schedule
            .execute(serde_json::json!({
                "message": "drink water",
                "every_minutes": 60
            }))
            .await
            .unwrap();

        let list = ListRemindersSkill { jobs };
        let reply = list.execute(serde_json::json!({})).await.unwrap();
        assert!(reply.contains("drink water"));
    }

    #[tokio::test]
    async fn remember_fact_stores_into_memory() {
        let memory = Arc::new(MockMemory::default());
        let skill = RememberFactSkill {
            memory: memory.clone(),
        };
        skill
            .execute(serde_json::json!({"fact": "prefers metric units"}))
            .await
            .unwrap();
        assert_eq!(memory.facts().await.unwrap(), vec!["prefers metric units"]);
    }
}
