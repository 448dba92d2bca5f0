//! Completion orchestration across a provider chain.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::budget::{BudgetLedger, TokenEstimator};
use crate::error::{BotError, BotResult};
use crate::llm::provider::{Completion, CompletionOptions, CompletionProvider, CompletionRequest};

/// Routes completion requests through an ordered provider chain.
///
/// Candidates are tried in configuration order: the primary first, then
/// each fallback. Every candidate is budget-gated before its network call;
/// a budget rejection aborts the whole chain rather than trying a cheaper
/// fallback, because a run that cannot afford its configured primary should
/// stop spending, not degrade silently. Provider failures and per-candidate
/// timeouts fail over to the next candidate.
pub struct CompletionRouter {
    providers: Vec<Arc<dyn CompletionProvider>>,
    ledger: Arc<BudgetLedger>,
    estimator: TokenEstimator,
}

impl CompletionRouter {
    /// Create a router with an empty chain.
    pub fn new(ledger: Arc<BudgetLedger>) -> Self {
        Self {
            providers: Vec::new(),
            ledger,
            estimator: TokenEstimator::new(),
        }
    }

    /// Append a candidate to the chain.
    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// The ledger this router records spend against.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Run one completion through the chain.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> BotResult<Completion> {
        if self.providers.is_empty() {
            return Err(BotError::Config(
                "no completion providers configured".to_string(),
            ));
        }

        let mut last_error: Option<BotError> = None;

        for provider in &self.providers {
            if request.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BotError::DeadlineExceeded("completion".to_string()));
            }

            let input_estimate = self.estimate_input(provider.as_ref(), request);
            let model = provider.model().to_string();
            if !self
                .ledger
                .allow(&model, input_estimate, options.max_output_tokens)
            {
                return Err(BotError::BudgetExceeded {
                    model,
                    reason: "projected cost exceeds a configured ceiling".to_string(),
                });
            }

            debug!(
                provider = provider.name(),
                model = %model,
                input_estimate,
                "trying completion candidate"
            );

            match self.run_candidate(provider, request, options).await {
                Err(err) if err.is_timeout() => {
                    // The caller's deadline elapsed mid-candidate; later
                    // candidates would be cut off the same way.
                    return Err(err);
                }
                Ok(completion) => {
                    if let Err(err) =
                        self.ledger
                            .spend(&model, completion.input_tokens, completion.output_tokens)
                    {
                        warn!(model = %model, error = %err, "failed to record completion spend");
                    }
                    return Ok(completion);
                }
                Err(err) => {
                    warn!(
                        provider = provider.name(),
                        error = %err,
                        "completion candidate failed, trying next"
                    );
                    last_error = Some(err);
                }
            }
        }

        // providers is non-empty, so at least one error was recorded
        let source = last_error.unwrap_or_else(|| {
            BotError::Config("completion chain produced no error".to_string())
        });
        Err(BotError::AllProvidersFailed {
            attempts: self.providers.len(),
            source: Box::new(source),
        })
    }

    /// Run one candidate on its own task, bounded by the tighter of the
    /// per-candidate timeout and the caller deadline.
    ///
    /// A candidate that overruns its bound is abandoned, not cancelled: the
    /// spawned task keeps running until its own HTTP timeout fires, but its
    /// result is discarded.
    async fn run_candidate(
        &self,
        provider: &Arc<dyn CompletionProvider>,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> BotResult<Completion> {
        let mut bound = options.timeout;
        let mut deadline_bound = false;
        if let Some(deadline) = request.deadline {
            let until_deadline = deadline.saturating_duration_since(Instant::now());
            if until_deadline < bound {
                bound = until_deadline;
                deadline_bound = true;
            }
        }

        let task_provider = Arc::clone(provider);
        let task_request = request.clone();
        let task_options = *options;
        let handle = tokio::spawn(async move {
            task_provider.complete(&task_request, &task_options).await
        });

        match tokio::time::timeout(bound, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(BotError::Provider {
                provider: provider.name().to_string(),
                message: format!("completion task failed: {join_err}"),
            }),
            Err(_elapsed) if deadline_bound => {
                Err(BotError::DeadlineExceeded("completion".to_string()))
            }
            Err(_elapsed) => Err(BotError::Provider {
                provider: provider.name().to_string(),
                message: format!("timed out after {}ms", bound.as_millis()),
            }),
        }
    }

    fn estimate_input(&self, provider: &dyn CompletionProvider, request: &CompletionRequest) -> u64 {
        let mut total = 0;
        for part in request.text_parts() {
            total += match provider.count_tokens(part) {
                Some(exact) => exact,
                None => self.estimator.estimate(part),
            };
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetConfig, ModelPrice, PriceTable};
    use async_trait::async_trait;

    struct StaticProvider {
        model: String,
        reply: String,
    }

    #[async_trait]
    impl CompletionProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            _options: &CompletionOptions,
        ) -> BotResult<Completion> {
            Ok(Completion {
                text: self.reply.clone(),
                input_tokens: 100,
                output_tokens: 50,
                model: self.model.clone(),
            })
        }
    }

    fn unlimited_router() -> CompletionRouter {
        CompletionRouter::new(Arc::new(BudgetLedger::new(BudgetConfig::unlimited())))
    }

    #[tokio::test]
    async fn test_empty_chain_is_config_error() {
        let router = unlimited_router();
        let err = router
            .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }

    #[tokio::test]
    async fn test_success_records_spend() {
        let config = BudgetConfig::unlimited()
            .with_prices(PriceTable::new().with_model("m", ModelPrice::new(1.0, 2.0)));
        let ledger = Arc::new(BudgetLedger::new(config));
        let router = CompletionRouter::new(Arc::clone(&ledger)).with_provider(Arc::new(
            StaticProvider {
                model: "m".to_string(),
                reply: "ok".to_string(),
            },
        ));

        let completion = router
            .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");

        // 100 in at 1c/1K + 50 out at 2c/1K = 0.2c
        let (run, _) = ledger.spent();
        assert!((run - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_rejection_aborts() {
        let config = BudgetConfig::new()
            .with_run_ceiling(0.001)
            .with_prices(PriceTable::new().with_model("m", ModelPrice::new(1.0, 2.0)));
        let router = CompletionRouter::new(Arc::new(BudgetLedger::new(config))).with_provider(
            Arc::new(StaticProvider {
                model: "m".to_string(),
                reply: "unreached".to_string(),
            }),
        );

        let err = router
            .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_budget());
    }

    #[tokio::test]
    async fn test_expired_deadline_rejected_up_front() {
        let router = unlimited_router().with_provider(Arc::new(StaticProvider {
            model: "m".to_string(),
            reply: "unreached".to_string(),
        }));

        let request = CompletionRequest::new("hi").with_deadline(Instant::now());
        let err = router
            .complete(&request, &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
