// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. What to
// prompt for, what to remember, and what a reminder says all live in the
// chat flow and the job handlers.
//
// Naming convention: Base* for trait names (e.g., BaseAI, BaseMemory)

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// AI Trait (Infrastructure - Generic LLM capabilities)
// =============================================================================

#[async_trait]
pub trait BaseAI: Send + Sync {
    /// Complete a prompt with an LLM (returns raw text response)
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt expecting JSON response (returns raw JSON string)
    /// Parse with serde_json::from_str in calling code
    async fn complete_json(&self, prompt: &str) -> Result<String> {
        // Default implementation calls complete
        self.complete(prompt).await
    }
}

// =============================================================================
// Memory Trait (conversation turns + durable facts)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Conversation and fact memory, durable across server restarts.
#[async_trait]
pub trait BaseMemory: Send + Sync {
    /// Append one conversation turn.
    async fn append_turn(&self, role: ChatRole, text: &str) -> Result<()>;

    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, limit: usize) -> Result<Vec<ChatTurn>>;

    /// Persist a standalone fact the assistant should remember.
    async fn store_fact(&self, fact: &str) -> Result<()>;

    /// All stored facts, oldest first.
    async fn facts(&self) -> Result<Vec<String>>;
}

// =============================================================================
// Notifier Trait (outbound delivery used by reminder jobs)
// =============================================================================

#[async_trait]
pub trait BaseNotifier: Send + Sync {
    /// Deliver one message to the user's configured channel.
    async fn notify(&self, message: &str) -> Result<()>;
}
