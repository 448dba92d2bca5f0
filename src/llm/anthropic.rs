//! Anthropic Messages API backend.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{truncate_body, BotError, BotResult};
use crate::llm::provider::{Completion, CompletionOptions, CompletionProvider, CompletionRequest};
use crate::transport::{RetryPolicy, Transport, TransportConfig};

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 512;

/// Anthropic completion backend.
pub struct AnthropicProvider {
    transport: Transport,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
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
            TransportConfig::new().with_api_base(base_url),
            RetryPolicy::default(),
        )?;
        Ok(Self {
            transport,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> BotResult<Completion> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_output_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let operation = format!("anthropic completion ({})", self.model);
        let response = self
            .transport
            .send_with_retry(
                || {
                    self.transport
                        .post("v1/messages")
                        .header("x-api-key", &self.api_key)
                        .header("anthropic-version", API_VERSION)
                        .json(&body)
                },
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

        let parsed: MessagesResponse =
            response.json().await.map_err(|err| BotError::Provider {
                provider: self.name().to_string(),
                message: format!("malformed response: {err}"),
            })?;

        let text = parsed
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<String>();
        debug!(
            model = %self.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "anthropic completion succeeded"
        );

        Ok(Completion {
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            model: self.model.clone(),
        })
    }
}
