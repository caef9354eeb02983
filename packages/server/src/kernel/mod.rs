// Kernel - core infrastructure with dependency injection
//
// The kernel holds server dependencies (store, scheduler, LLM, memory)
// and provides dependency injection through traits for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only. What the assistant says
// and when jobs fire is decided by the chat flow and the scheduler core.

pub mod ai;
pub mod deps;
pub mod jobs;
pub mod memory;
pub mod skills;
pub mod test_dependencies;
pub mod traits;

pub use ai::ClaudeClient;
pub use deps::{ServerDeps, SharedDeps};
pub use jobs::{build_registry, ensure_default_jobs, DAILY_DIGEST_KIND, SEND_REMINDER_KIND};
pub use memory::{JsonMemory, PgMemory};
pub use skills::{Skill, SkillSet};
pub use test_dependencies::{LogNotifier, MockAI, MockMemory, MockNotifier};
pub use traits::*;
