//! Completion backend capability surface.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::BotResult;

/// One completion request, backend-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system prompt.
    pub system: Option<String>,
    /// User prompt text.
    pub prompt: String,
    /// Absolute deadline for the whole call, including fallbacks.
    pub deadline: Option<Instant>,
}

impl CompletionRequest {
    /// Create a request with only a user prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            deadline: None,
        }
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// All prompt text parts, for token estimation.
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.system.as_deref().into_iter().chain([self.prompt.as_str()])
    }
}

/// Per-call tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    /// Cap on generated tokens, also used as the output-side budget
    /// projection.
    pub max_output_tokens: u64,
    /// Per-candidate timeout; the caller deadline can shorten it further.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

impl CompletionOptions {
    /// Set the generated-token cap.
    pub fn with_max_output_tokens(mut self, tokens: u64) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Set the per-candidate timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Normalized result of a successful completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Input tokens the backend reported consuming.
    pub input_tokens: u64,
    /// Output tokens the backend reported generating.
    pub output_tokens: u64,
    /// Model that produced the text.
    pub model: String,
}

/// A completion backend.
///
/// Implementations normalize their wire format to [`Completion`] and map
/// failures into [`crate::error::BotError::Provider`]. Transient HTTP
/// failures are retried inside `complete` on the transport's schedule, so
/// the orchestrator only ever sees one outcome per candidate.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stable provider name for logs and errors.
    fn name(&self) -> &str;

    /// Priced model key this provider calls.
    fn model(&self) -> &str;

    /// Exact token count for a piece of text, when the backend has a
    /// tokenizer. `None` falls back to the shared heuristic estimator.
    fn count_tokens(&self, _text: &str) -> Option<u64> {
        None
    }

    /// Run one completion.
    async fn complete(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> BotResult<Completion>;
}
