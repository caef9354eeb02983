// Operator CLI for inspecting and manipulating scheduled jobs.
//
// Talks to the same store the server uses, selected by the same
// environment variables. Handlers never run here; the registry exists
// only so `schedule` can validate kinds.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use emonk_scheduler::{
    Clock, JobFilter, JobStatus, JobStore, JobsApi, JsonJobStore, NewJob, PgJobStore, Schedule,
    SystemClock,
};
use server_core::config::StorageConfig;
use server_core::kernel::{build_registry, LogNotifier, MockAI, MockMemory};
use server_core::Config;

#[derive(Parser)]
#[command(name = "jobs_cli", about = "Inspect and manage Emonk scheduler jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs, optionally filtered by status and kind
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Cancel a pending job
    Cancel { id: Uuid },
    /// Schedule a new job
    Schedule {
        #[arg(long)]
        kind: String,
        /// JSON payload passed to the handler
        #[arg(long, default_value = "{}")]
        payload: String,
        /// One-shot: RFC 3339 instant
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Recurring: five-field cron expression
        #[arg(long)]
        cron: Option<String>,
        /// Recurring: fixed interval in seconds
        #[arg(long)]
        every_seconds: Option<u64>,
        /// Timezone for --cron
        #[arg(long, default_value = "UTC")]
        tz: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let store: Arc<dyn JobStore> = match &config.storage {
        StorageConfig::Json { data_dir } => Arc::new(JsonJobStore::new(data_dir.clone())),
        StorageConfig::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgJobStore::new(pool))
        }
    };

    let registry = Arc::new(build_registry(
        Arc::new(LogNotifier),
        Arc::new(MockAI::default()),
        Arc::new(MockMemory::default()),
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jobs = JobsApi::new(store, registry, clock, config.max_attempts_default);

    match cli.command {
        Commands::List {
            status,
            kind,
            limit,
        } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let records = jobs
                .list(&JobFilter {
                    status,
                    kind,
                    limit: Some(limit),
                })
                .await?;
            if records.is_empty() {
                println!("no jobs");
                return Ok(());
            }
            for r in records {
                println!(
                    "{}  {:<10} {:<16} attempts {}/{}  next {}{}",
                    r.id,
                    r.status.as_str(),
                    r.kind,
                    r.attempts,
                    r.max_attempts,
                    r.next_run_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    r.last_error
                        .map(|e| format!("  last error: {}", e))
                        .unwrap_or_default(),
                );
            }
        }
        Commands::Cancel { id } => {
            let outcome = jobs.cancel(id).await?;
            println!("{:?}", outcome);
        }
        Commands::Schedule {
            kind,
            payload,
            at,
            cron,
            every_seconds,
            tz,
        } => {
            let schedule = match (at, cron, every_seconds) {
                (Some(at), None, None) => Schedule::once(at),
                (None, Some(expr), None) => Schedule::cron(expr, tz),
                (None, None, Some(seconds)) => Schedule::Every { seconds },
                _ => bail!("exactly one of --at, --cron, or --every-seconds is required"),
            };
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let record = jobs
                .schedule(NewJob {
                    kind,
                    payload,
                    schedule,
                    max_attempts: None,
                })
                .await?;
            println!("scheduled {} (next run {})", record.id, record.next_run_at);
        }
    }

    Ok(())
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        other => bail!("unknown status {:?}", other),
    })
}
