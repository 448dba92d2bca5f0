//! Resilience and budget-governance core for an LLM repository bot.
//!
//! The bot reacts to code-host webhooks, reads pull request diffs, asks a
//! completion backend for review or patch suggestions, and posts the result
//! back. This crate is the layer that keeps that loop safe and affordable:
//!
//! - [`dedup`]: at-most-once handling of redelivered webhook events.
//! - [`transport`]: retrying, rate-limit-aware, validator-cached HTTP to
//!   the code-hosting API.
//! - [`diff`]: decoding unified diff text into a structured change set.
//! - [`budget`]: spend projection and bookkeeping against run and daily
//!   ceilings.
//! - [`llm`]: the completion provider chain with budget gating and
//!   failover.
//!
//! [`config::Settings`] ties the modules together from a TOML file and the
//! environment; [`logging::init`] sets up the tracing subscriber.

pub mod budget;
pub mod config;
pub mod dedup;
pub mod diff;
pub mod error;
pub mod llm;
pub mod logging;
pub mod transport;

pub use budget::{BudgetConfig, BudgetLedger, ModelPrice, PriceTable, TokenEstimator};
pub use crate::config::Settings;
pub use dedup::{DedupConfig, DeliveryCache};
pub use diff::{Diff, DiffFile, DiffHunk, DiffLine};
pub use error::{BotError, BotResult};
pub use llm::{
    Completion, CompletionOptions, CompletionProvider, CompletionRequest, CompletionRouter,
};
pub use transport::{RetryPolicy, Transport, TransportConfig};
