//! Conversation and fact memory backends.
//!
//! `JsonMemory` keeps everything in one file next to the JSON job store
//! for development; `PgMemory` uses two small tables and is selected
//! together with the Postgres job store. Memory survives restarts either
//! way — the server itself stays stateless.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use super::traits::{BaseMemory, ChatRole, ChatTurn};

/// Conversation history kept beyond this gets dropped oldest-first.
const MAX_TURNS: usize = 500;

// =============================================================================
// JSON file backend
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    turns: Vec<ChatTurn>,
    facts: Vec<String>,
}

pub struct JsonMemory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonMemory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("memory.json"),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<MemoryFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt memory file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryFile::default()),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    async fn save(&self, memory: &MemoryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(memory)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl BaseMemory for JsonMemory {
    async fn append_turn(&self, role: ChatRole, text: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut memory = self.load().await?;
        memory.turns.push(ChatTurn {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
        if memory.turns.len() > MAX_TURNS {
            let excess = memory.turns.len() - MAX_TURNS;
            memory.turns.drain(..excess);
        }
        self.save(&memory).await
    }

    async fn recent_turns(&self, limit: usize) -> Result<Vec<ChatTurn>> {
        let memory = self.load().await?;
        let skip = memory.turns.len().saturating_sub(limit);
        Ok(memory.turns.into_iter().skip(skip).collect())
    }

    async fn store_fact(&self, fact: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut memory = self.load().await?;
        memory.facts.push(fact.to_string());
        self.save(&memory).await
    }

    async fn facts(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.facts)
    }
}

// =============================================================================
// Postgres backend
// =============================================================================

pub struct PgMemory {
    pool: PgPool,
}

impl PgMemory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseMemory for PgMemory {
    async fn append_turn(&self, role: ChatRole, text: &str) -> Result<()> {
        sqlx::query("INSERT INTO assistant_turns (role, text, at) VALUES ($1, $2, $3)")
            .bind(match role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            })
            .bind(text)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_turns(&self, limit: usize) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            "SELECT role, text, at FROM assistant_turns ORDER BY id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns: Vec<ChatTurn> = rows
            .into_iter()
            .map(|row| ChatTurn {
                role: match row.get::<String, _>("role").as_str() {
                    "assistant" => ChatRole::Assistant,
                    _ => ChatRole::User,
                },
                text: row.get("text"),
                at: row.get("at"),
            })
            .collect();
        turns.reverse();
        Ok(turns)
    }

    async fn store_fact(&self, fact: &str) -> Result<()> {
        sqlx::query("INSERT INTO assistant_facts (fact, created_at) VALUES ($1, $2)")
            .bind(fact)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn facts(&self) -> Result<Vec<String>> {
        let facts = sqlx::query_scalar("SELECT fact FROM assistant_facts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(facts)
    }
}
