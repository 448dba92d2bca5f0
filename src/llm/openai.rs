//! OpenAI Chat Completions backend.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{truncate_body, BotError, BotResult};
use crate::llm::provider::{Completion, CompletionOptions, CompletionProvider, CompletionRequest};
use crate::transport::{RetryPolicy, Transport, TransportConfig};

const DEFAULT_BASE: &str = "https://api.openai.com";
const ERROR_BODY_LIMIT: usize = 512;

/// OpenAI completion backend.
pub struct OpenAiProvider {
    transport: Transport,
    model: String,
}

impl OpenAiProvider {
    /// Create a provider for one model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> BotResult<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE)
    }

    /// Create a provider against a non-default endpoint (proxies, tests).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> BotResult<Self> {
        let transport = Transport::new(
            TransportConfig::new()
                .with_api_base(base_url)
                .with_token(api_key),
            RetryPolicy::default(),
        )?;
        Ok(Self {
            transport,
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> BotResult<Completion> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.model,
            "max_tokens": options.max_output_tokens,
            "messages": messages,
        });

        let operation = format!("openai completion ({})", self.model);
        let response = self
            .transport
            .send_with_retry(
                || self.transport.post("v1/chat/completions").json(&body),
                &operation,
                request.deadline,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BotError::Provider {
                provider: self.name().to_string(),
                message: format!("HTTP {status}: {}", truncate_body(&text, ERROR_BODY_LIMIT)),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| BotError::Provider {
            provider: self.name().to_string(),
            message: format!("malformed response: {err}"),
        })?;

        let text = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| BotError::Provider {
                provider: self.name().to_string(),
                message: "response contained no choices".to_string(),
            })?;
        debug!(
            model = %self.model,
            input_tokens = parsed.usage.prompt_tokens,
            output_tokens = parsed.usage.completion_tokens,
            "openai completion succeeded"
        );

        Ok(Completion {
            text,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
            model: self.model.clone(),
        })
    }
}
