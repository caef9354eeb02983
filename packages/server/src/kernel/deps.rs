//! Server dependencies wired once at startup.
//!
//! `ServerDeps` is the central container handed to routes and skills.
//! External services hide behind the `Base*` traits so tests swap in
//! mocks without touching the wiring.

use std::sync::Arc;

use anyhow::Result;

use emonk_scheduler::{
    Clock, HandlerRegistry, JobStore, JobsApi, Scheduler, SchedulerConfig, SystemClock,
};

use super::jobs::build_registry;
use super::skills::SkillSet;
use super::traits::{BaseAI, BaseMemory, BaseNotifier};
use crate::config::Config;

/// Server dependencies accessible to routes, skills, and job handlers.
pub struct ServerDeps {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<HandlerRegistry>,
    pub scheduler: Scheduler,
    pub jobs: Arc<JobsApi>,
    pub ai: Arc<dyn BaseAI>,
    pub memory: Arc<dyn BaseMemory>,
    pub notifier: Arc<dyn BaseNotifier>,
    pub skills: SkillSet,
}

impl ServerDeps {
    /// Wire the scheduler core, job API, and skills over the given
    /// infrastructure implementations.
    pub fn assemble(
        config: Config,
        store: Arc<dyn JobStore>,
        ai: Arc<dyn BaseAI>,
        memory: Arc<dyn BaseMemory>,
        notifier: Arc<dyn BaseNotifier>,
    ) -> Result<Self> {
        let registry = Arc::new(build_registry(
            notifier.clone(),
            ai.clone(),
            memory.clone(),
        ));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let scheduler_config = SchedulerConfig {
            concurrency: config.tick_concurrency,
            handler_timeout: config.handler_timeout,
            lease_floor: config.lease_duration,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
            scheduler_config,
        )?;

        let jobs = Arc::new(JobsApi::new(
            store.clone(),
            registry.clone(),
            clock,
            config.max_attempts_default,
        ));

        let skills = SkillSet::builtin(
            jobs.clone(),
            memory.clone(),
            config.scheduler_timezone.clone(),
        );

        Ok(Self {
            config,
            store,
            registry,
            scheduler,
            jobs,
            ai,
            memory,
            notifier,
            skills,
        })
    }
}

pub type SharedDeps = Arc<ServerDeps>;
