// Main entry point for the Emonk assistant server

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emonk_scheduler::{JobStore, JsonJobStore, PgJobStore};
use server_core::config::StorageConfig;
use server_core::kernel::{
    ensure_default_jobs, BaseAI, BaseMemory, BaseNotifier, ClaudeClient, JsonMemory, LogNotifier,
    MockAI, PgMemory, ServerDeps,
};
use server_core::server::build_app;
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,emonk_scheduler=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Emonk assistant server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(cadence = %config.scheduler_cadence, "Configuration loaded");

    // Storage: job store + memory share a backend
    let (store, memory): (Arc<dyn JobStore>, Arc<dyn BaseMemory>) = match &config.storage {
        StorageConfig::Json { data_dir } => {
            tracing::info!(dir = %data_dir.display(), "Using JSON storage (development)");
            (
                Arc::new(JsonJobStore::new(data_dir.clone())),
                Arc::new(JsonMemory::new(data_dir.clone())),
            )
        }
        StorageConfig::Postgres { database_url } => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Running database migrations...");
            let store = PgJobStore::new(pool.clone());
            store.migrate().await.context("Failed to run scheduler migrations")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run server migrations")?;
            tracing::info!("Migrations complete");

            (Arc::new(store), Arc::new(PgMemory::new(pool)))
        }
    };

    // LLM: real client when a key is configured, mock otherwise
    let ai: Arc<dyn BaseAI> = match &config.anthropic_api_key {
        Some(key) => Arc::new(ClaudeClient::new(key.clone())),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set, chat replies will use the mock AI");
            Arc::new(MockAI::default())
        }
    };
    let notifier: Arc<dyn BaseNotifier> = Arc::new(LogNotifier);

    let deps = Arc::new(
        ServerDeps::assemble(config.clone(), store, ai, memory, notifier)
            .context("Failed to wire dependencies")?,
    );

    // Standing jobs (daily digest) are scheduled through the same job API
    // the chat skills use.
    ensure_default_jobs(&deps.jobs, &config.scheduler_timezone)
        .await
        .context("Failed to schedule standing jobs")?;

    // Build application
    let app = build_app(deps);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Tick endpoint: http://localhost:{}/cron/tick", config.port);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
