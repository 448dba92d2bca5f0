//! Completion backends and the orchestrator that drives them.
//!
//! Each backend family implements [`CompletionProvider`], normalizing its
//! wire format to [`Completion`]. The [`CompletionRouter`] walks an ordered
//! chain of providers, budget-gating every candidate and failing over on
//! provider errors and timeouts.

mod anthropic;
mod openai;
mod provider;
mod router;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use provider::{Completion, CompletionOptions, CompletionProvider, CompletionRequest};
pub use router::CompletionRouter;
