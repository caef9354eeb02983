//! Handler registry: maps job kinds to the async functions that execute
//! them.
//!
//! Registration happens once at process start; afterwards the registry is
//! shared behind an `Arc` and reads are plain `HashMap` lookups. Handlers
//! receive a [`HandlerContext`] carrying their deadline and a cancellation
//! token, deserialize their own payload type, and must be idempotent —
//! the at-least-once contract means a stolen lease can replay them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-execution context handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub job_id: Uuid,
    pub kind: String,
    /// 1-based attempt number of this execution.
    pub attempt: i32,
    /// Moment the handler must be done by; the scheduler cancels the
    /// token and abandons the execution once this passes.
    pub deadline: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler registered for the record's kind. Terminal by contract.
    #[error("unknown kind")]
    UnknownKind,
    /// Everything else a handler can do wrong, treated as transient until
    /// the attempt budget runs out.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

type BoxedHandler = Box<
    dyn Fn(HandlerContext, serde_json::Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

struct Registration {
    handler: BoxedHandler,
    timeout: Option<Duration>,
}

/// Kind → handler map, immutable after startup.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: HashMap<String, Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a handler whose payload deserializes to `P`.
    pub fn register<P, F, Fut>(&mut self, kind: &str, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(HandlerContext, P) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert(kind, None, handler);
    }

    /// Register with a per-kind execution timeout that overrides the
    /// scheduler default.
    pub fn register_with_timeout<P, F, Fut>(&mut self, kind: &str, timeout: Duration, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(HandlerContext, P) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert(kind, Some(timeout), handler);
    }

    fn insert<P, F, Fut>(&mut self, kind: &str, timeout: Option<Duration>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(HandlerContext, P) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind_owned = kind.to_string();
        let boxed: BoxedHandler = Box::new(move |ctx, value| {
            let handler = handler.clone();
            let kind = kind_owned.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value)
                    .map_err(|e| anyhow!("failed to deserialize {} payload: {}", kind, e))?;
                handler(ctx, payload).await
            })
        });
        self.registrations.insert(
            kind.to_string(),
            Registration {
                handler: boxed,
                timeout,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.registrations.contains_key(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.registrations.keys().map(String::as_str).collect()
    }

    /// The per-kind timeout override, if any.
    pub fn timeout_for(&self, kind: &str) -> Option<Duration> {
        self.registrations.get(kind).and_then(|r| r.timeout)
    }

    /// Run the handler for `ctx.kind` with the given payload.
    pub async fn dispatch(
        &self,
        ctx: HandlerContext,
        payload: serde_json::Value,
    ) -> Result<(), DispatchError> {
        let registration = self
            .registrations
            .get(&ctx.kind)
            .ok_or(DispatchError::UnknownKind)?;
        (registration.handler)(ctx, payload).await?;
        Ok(())
    }
}
