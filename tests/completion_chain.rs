//! Completion chain failover, budget gating, and timeout behavior.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use patchbot::budget::{BudgetConfig, BudgetLedger, ModelPrice, PriceTable};
use patchbot::error::{BotError, BotResult};
use patchbot::llm::{
    Completion, CompletionOptions, CompletionProvider, CompletionRequest, CompletionRouter,
};

/// Scripted provider that records each invocation in a shared log.
struct ScriptedProvider {
    name: String,
    model: String,
    outcome: Outcome,
    log: Arc<Mutex<Vec<String>>>,
}

enum Outcome {
    Succeed(&'static str),
    Fail,
    Hang(Duration),
}

impl ScriptedProvider {
    fn new(
        name: &str,
        model: &str,
        outcome: Outcome,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            model: model.to_string(),
            outcome,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        _request: &CompletionRequest,
        _options: &CompletionOptions,
    ) -> BotResult<Completion> {
        self.log.lock().unwrap().push(self.name.clone());
        match &self.outcome {
            Outcome::Succeed(text) => Ok(Completion {
                text: text.to_string(),
                input_tokens: 100,
                output_tokens: 40,
                model: self.model.clone(),
            }),
            Outcome::Fail => Err(BotError::Provider {
                provider: self.name.clone(),
                message: "scripted failure".to_string(),
            }),
            Outcome::Hang(duration) => {
                tokio::time::sleep(*duration).await;
                Err(BotError::Provider {
                    provider: self.name.clone(),
                    message: "woke up after hang".to_string(),
                })
            }
        }
    }
}

fn unlimited_ledger() -> Arc<BudgetLedger> {
    Arc::new(BudgetLedger::new(BudgetConfig::unlimited()))
}

#[tokio::test]
async fn chain_fails_over_in_order_and_invokes_each_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(unlimited_ledger())
        .with_provider(ScriptedProvider::new("primary", "m1", Outcome::Fail, &log))
        .with_provider(ScriptedProvider::new("backup", "m2", Outcome::Fail, &log))
        .with_provider(ScriptedProvider::new(
            "last-resort",
            "m3",
            Outcome::Succeed("made it"),
            &log,
        ));

    let completion = router
        .complete(&CompletionRequest::new("review this"), &CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(completion.text, "made it");
    assert_eq!(completion.model, "m3");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["primary", "backup", "last-resort"]
    );
}

#[tokio::test]
async fn exhausted_chain_reports_all_failed_with_last_cause() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(unlimited_ledger())
        .with_provider(ScriptedProvider::new("one", "m1", Outcome::Fail, &log))
        .with_provider(ScriptedProvider::new("two", "m2", Outcome::Fail, &log));

    let err = router
        .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
        .await
        .unwrap_err();

    match err {
        BotError::AllProvidersFailed { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(*source, BotError::Provider { ref provider, .. } if provider == "two"));
        }
        other => panic!("expected AllProvidersFailed, got {other}"),
    }
}

#[tokio::test]
async fn budget_rejection_aborts_without_trying_cheaper_fallback() {
    // Primary's model is priced; the fallback's is free and would pass.
    let config = BudgetConfig::new()
        .with_run_ceiling(0.01)
        .with_prices(PriceTable::new().with_model("expensive", ModelPrice::new(10.0, 10.0)));
    let ledger = Arc::new(BudgetLedger::new(config));

    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(ledger)
        .with_provider(ScriptedProvider::new(
            "primary",
            "expensive",
            Outcome::Succeed("unreached"),
            &log,
        ))
        .with_provider(ScriptedProvider::new(
            "cheap-fallback",
            "free-model",
            Outcome::Succeed("also unreached"),
            &log,
        ));

    let err = router
        .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_budget(), "expected budget error, got {err}");
    // Neither candidate ran a network call: not the rejected primary, and
    // not the fallback that would have fit.
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn successful_completion_records_actual_usage() {
    let config = BudgetConfig::unlimited()
        .with_prices(PriceTable::new().with_model("m", ModelPrice::new(1.0, 2.0)));
    let ledger = Arc::new(BudgetLedger::new(config));

    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(Arc::clone(&ledger)).with_provider(
        ScriptedProvider::new("only", "m", Outcome::Succeed("done"), &log),
    );

    router
        .complete(&CompletionRequest::new("hi"), &CompletionOptions::default())
        .await
        .unwrap();

    // 100 in at 1c/1K + 40 out at 2c/1K = 0.18c
    let (run, daily) = ledger.spent();
    assert!((run - 0.18).abs() < 1e-9);
    assert!((daily - 0.18).abs() < 1e-9);
}

#[tokio::test]
async fn hung_provider_is_bounded_and_fails_over() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(unlimited_ledger())
        .with_provider(ScriptedProvider::new(
            "hung",
            "m1",
            Outcome::Hang(Duration::from_secs(60)),
            &log,
        ))
        .with_provider(ScriptedProvider::new(
            "alive",
            "m2",
            Outcome::Succeed("rescued"),
            &log,
        ));

    let options = CompletionOptions::default().with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let completion = router
        .complete(&CompletionRequest::new("hi"), &options)
        .await
        .unwrap();

    assert_eq!(completion.text, "rescued");
    // Bounded by the candidate timeout, not the 60s hang.
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn deadline_bounds_a_provider_that_never_returns() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(unlimited_ledger()).with_provider(ScriptedProvider::new(
        "hung",
        "m1",
        Outcome::Hang(Duration::from_secs(600)),
        &log,
    ));

    let request =
        CompletionRequest::new("hi").with_deadline(Instant::now() + Duration::from_millis(100));
    let started = Instant::now();
    let err = router
        .complete(&request, &CompletionOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected deadline error, got {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn expired_deadline_after_hung_candidate_is_a_timeout() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = CompletionRouter::new(unlimited_ledger())
        .with_provider(ScriptedProvider::new(
            "hung",
            "m1",
            Outcome::Hang(Duration::from_secs(60)),
            &log,
        ))
        .with_provider(ScriptedProvider::new(
            "never-tried",
            "m2",
            Outcome::Succeed("unreached"),
            &log,
        ));

    let request =
        CompletionRequest::new("hi").with_deadline(Instant::now() + Duration::from_millis(150));
    let started = Instant::now();
    let err = router
        .complete(&request, &CompletionOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected deadline error, got {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
