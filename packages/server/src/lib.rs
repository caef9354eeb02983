//! Emonk: a single-tenant assistant service around the scheduler core.
//!
//! The library half of the server crate: configuration, the dependency
//! kernel (LLM, memory, skills, notifier, PII redaction), the built-in
//! job handlers, and the axum application. The binaries (`server`,
//! `jobs_cli`) are thin shells over this.

pub mod common;
pub mod config;
pub mod kernel;
pub mod server;

pub use config::Config;
