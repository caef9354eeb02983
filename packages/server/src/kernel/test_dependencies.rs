//! Mock implementations of the kernel traits for tests and for local
//! development without external credentials.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use super::traits::{BaseAI, BaseMemory, BaseNotifier, ChatRole, ChatTurn};

// =============================================================================
// MockAI
// =============================================================================

/// Scripted AI: pops queued responses, falls back to a canned reply, and
/// records every prompt it saw.
#[derive(Default)]
pub struct MockAI {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockAI {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseAI for MockAI {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Okay.".to_string()))
    }
}

// =============================================================================
// MockNotifier
// =============================================================================

/// Captures outbound notifications instead of delivering them.
#[derive(Default)]
pub struct MockNotifier {
    messages: Mutex<Vec<String>>,
}

impl MockNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseNotifier for MockNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Notifier that writes to the log; the development default when no
/// delivery channel is configured.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl BaseNotifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        tracing::info!(message = %message, "notification");
        Ok(())
    }
}

// =============================================================================
// MockMemory
// =============================================================================

/// In-process memory with no persistence.
#[derive(Default)]
pub struct MockMemory {
    turns: Mutex<Vec<ChatTurn>>,
    stored_facts: Mutex<Vec<String>>,
}

#[async_trait]
impl BaseMemory for MockMemory {
    async fn append_turn(&self, role: ChatRole, text: &str) -> Result<()> {
        self.turns.lock().unwrap().push(ChatTurn {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_turns(&self, limit: usize) -> Result<Vec<ChatTurn>> {
        let turns = self.turns.lock().unwrap();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns[skip..].to_vec())
    }

    async fn store_fact(&self, fact: &str) -> Result<()> {
        self.stored_facts.lock().unwrap().push(fact.to_string());
        Ok(())
    }

    async fn facts(&self) -> Result<Vec<String>> {
        Ok(self.stored_facts.lock().unwrap().clone())
    }
}
