//! Chat webhook: the assistant's inbound message path.
//!
//! Flow: redact PII → recall memory → ask the LLM for a reply and an
//! optional skill invocation → run the skill → persist both turns →
//! return a JSON card. LLM and skill faults degrade to an apologetic
//! reply; this endpoint only returns non-2xx for authentication.

use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::common::pii;
use crate::kernel::{ChatRole, ServerDeps};
use crate::server::app::AppState;

const FALLBACK_REPLY: &str = "Sorry, I'm having trouble thinking right now. Try again in a bit.";

/// Inbound chat message.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub sender: String,
    pub text: String,
}

/// The JSON card returned to the chat platform.
#[derive(Debug, Serialize)]
pub struct ChatCard {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_used: Option<String>,
}

pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    if let Some(secret) = &state.deps.config.webhook_secret {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(secret.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response();
        }
    }

    tracing::debug!(sender = %payload.sender, "chat message received");
    let card = process_message(&state.deps, &payload.text).await;
    (StatusCode::OK, Json(card)).into_response()
}

/// Run one chat exchange. Never fails: every fault path produces a
/// usable reply instead.
async fn process_message(deps: &ServerDeps, text: &str) -> ChatCard {
    let redacted = pii::redact(text);
    if redacted.was_redacted() {
        tracing::info!(kinds = ?redacted.found, "redacted PII from inbound message");
    }

    // Recall history before appending, so the prompt lists the newest
    // message exactly once.
    let turns = deps.memory.recent_turns(12).await.unwrap_or_default();
    let facts = deps.memory.facts().await.unwrap_or_default();
    let prompt = build_prompt(deps, &facts, &turns, &redacted.text);

    if let Err(e) = deps.memory.append_turn(ChatRole::User, &redacted.text).await {
        warn!(error = %e, "failed to persist user turn");
    }

    let decision = match deps.ai.complete_json(&prompt).await {
        Ok(raw) => parse_decision(&raw),
        Err(e) => {
            warn!(error = %e, "LLM call failed");
            Decision {
                reply: FALLBACK_REPLY.to_string(),
                skill: None,
            }
        }
    };

    let mut reply = decision.reply;
    let mut skill_used = None;

    if let Some(invocation) = decision.skill {
        match deps.skills.find(&invocation.name) {
            Some(skill) => match skill.execute(invocation.args).await {
                Ok(confirmation) => {
                    skill_used = Some(invocation.name);
                    if reply.is_empty() {
                        reply = confirmation;
                    } else {
                        reply = format!("{}\n{}", reply, confirmation);
                    }
                }
                Err(e) => {
                    warn!(skill = %invocation.name, error = %e, "skill execution failed");
                    reply = format!("{}\n(I couldn't finish that: {})", reply, e);
                }
            },
            None => {
                warn!(skill = %invocation.name, "LLM asked for an unknown skill");
            }
        }
    }

    if reply.trim().is_empty() {
        reply = "Okay.".to_string();
    }

    if let Err(e) = deps.memory.append_turn(ChatRole::Assistant, &reply).await {
        warn!(error = %e, "failed to persist assistant turn");
    }

    ChatCard { reply, skill_used }
}

fn build_prompt(
    deps: &ServerDeps,
    facts: &[String],
    turns: &[crate::kernel::ChatTurn],
    message: &str,
) -> String {
    let mut prompt = String::from(
        "You are Emonk, the user's personal assistant. Decide how to answer \
         the newest message. You may invoke at most one skill.\n\n\
         Respond with exactly one JSON object:\n\
         {\"reply\": \"<what to say>\", \"skill\": null}\n\
         or\n\
         {\"reply\": \"<what to say>\", \"skill\": {\"name\": \"<skill>\", \"args\": {...}}}\n",
    );

    prompt.push_str("\nAvailable skills:\n");
    prompt.push_str(&deps.skills.catalog());

    if !facts.is_empty() {
        prompt.push_str("\n\nKnown facts about the user:\n");
        for fact in facts {
            prompt.push_str(&format!("- {}\n", fact));
        }
    }

    if !turns.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in turns {
            let who = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            prompt.push_str(&format!("{}: {}\n", who, turn.text));
        }
    }

    prompt.push_str(&format!("\nNewest message:\nuser: {}\n", message));
    prompt
}

struct Decision {
    reply: String,
    skill: Option<SkillInvocation>,
}

struct SkillInvocation {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    skill: Option<RawSkill>,
}

#[derive(Debug, Deserialize)]
struct RawSkill {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Parse the model's decision, tolerating markdown code fences. Anything
/// unparseable is treated as a plain-text reply.
fn parse_decision(raw: &str) -> Decision {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<RawDecision>(trimmed) {
        Ok(decision) => Decision {
            reply: decision.reply,
            skill: decision.skill.map(|s| SkillInvocation {
                name: s.name,
                args: s.args,
            }),
        },
        Err(_) => Decision {
            reply: raw.trim().to_string(),
            skill: None,
        },
    }
}
