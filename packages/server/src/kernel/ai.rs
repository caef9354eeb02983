// AI implementation using Anthropic Claude
//
// This is the infrastructure implementation of BaseAI. Business logic
// (what to prompt for) lives in the chat flow and job handlers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::anthropic;

use super::BaseAI;

/// Anthropic Claude implementation of AI capabilities
pub struct ClaudeClient {
    client: anthropic::Client,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        let client = anthropic::ClientBuilder::new(&api_key).build();
        Self { client }
    }
}

#[async_trait]
impl BaseAI for ClaudeClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(anthropic::CLAUDE_3_5_SONNET)
            .preamble("You are Emonk, a concise personal assistant.")
            .max_tokens(2048)
            .build();

        let response = agent
            .prompt(prompt)
            .await
            .context("Failed to call Anthropic API")?;

        Ok(response)
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(anthropic::CLAUDE_3_5_SONNET)
            .preamble(
                "You are Emonk, a concise personal assistant. \
                 Respond with a single valid JSON object and nothing else.",
            )
            .max_tokens(2048)
            .build();

        let response = agent
            .prompt(prompt)
            .await
            .context("Failed to call Anthropic API")?;

        Ok(response)
    }
}
