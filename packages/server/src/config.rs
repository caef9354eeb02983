use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;

/// Deployment environment. Production tightens preconditions that are
/// relaxed for local development.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Which job store backend to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Single-process file store; development only.
    Json { data_dir: PathBuf },
    /// Document store on Postgres; the production backend.
    Postgres { database_url: String },
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub storage: StorageConfig,

    // Tick endpoint authentication: a trigger-platform header, a shared
    // bearer secret, or both.
    pub tick_trigger_header: Option<String>,
    pub cron_secret: Option<String>,

    /// Chat webhook bearer secret; optional in development.
    pub webhook_secret: Option<String>,

    /// Informational only — the external trigger owns the cadence.
    pub scheduler_cadence: String,
    pub scheduler_timezone: String,

    pub lease_duration: Duration,
    pub max_attempts_default: i32,
    pub handler_timeout: Duration,
    pub tick_concurrency: usize,

    /// When absent, the server falls back to the mock AI (development).
    pub anthropic_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            _ => Environment::Development,
        };

        let storage = match env::var("SCHEDULER_STORAGE").as_deref() {
            Ok("postgres") | Ok("document-db") => StorageConfig::Postgres {
                database_url: env::var("DATABASE_URL")
                    .context("DATABASE_URL must be set for postgres storage")?,
            },
            Ok("json") | Err(_) => StorageConfig::Json {
                data_dir: env::var("DATA_DIR")
                    .unwrap_or_else(|_| "./data".to_string())
                    .into(),
            },
            Ok(other) => bail!("SCHEDULER_STORAGE must be json or postgres, got {:?}", other),
        };

        let config = Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment,
            storage,
            tick_trigger_header: env::var("TICK_TRIGGER_HEADER").ok().filter(|h| !h.is_empty()),
            cron_secret: env::var("CRON_SECRET").ok().filter(|s| !s.is_empty()),
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            scheduler_cadence: env::var("SCHEDULER_CADENCE")
                .unwrap_or_else(|_| "* * * * *".to_string()),
            scheduler_timezone: env::var("SCHEDULER_TIMEZONE")
                .unwrap_or_else(|_| "UTC".to_string()),
            lease_duration: Duration::from_secs(
                env::var("LEASE_DURATION_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("LEASE_DURATION_SECONDS must be a number")?,
            ),
            max_attempts_default: env::var("MAX_ATTEMPTS_DEFAULT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_ATTEMPTS_DEFAULT must be a number")?,
            handler_timeout: Duration::from_secs(
                env::var("HANDLER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("HANDLER_TIMEOUT_SECONDS must be a number")?,
            ),
            tick_concurrency: env::var("TICK_CONCURRENCY")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("TICK_CONCURRENCY must be a number")?,
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Preconditions that must hold before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.environment == Environment::Production {
            if self.cron_secret.is_none() && self.tick_trigger_header.is_none() {
                bail!(
                    "production requires tick authentication: set CRON_SECRET or TICK_TRIGGER_HEADER"
                );
            }
            if matches!(self.storage, StorageConfig::Json { .. }) {
                bail!("the json store is single-process only; production requires postgres");
            }
        }
        if self.max_attempts_default < 1 {
            bail!("MAX_ATTEMPTS_DEFAULT must be at least 1");
        }
        if self.tick_concurrency == 0 {
            bail!("TICK_CONCURRENCY must be at least 1");
        }
        Ok(())
    }
}
