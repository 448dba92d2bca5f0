//! Running spend ledger with run and daily ceilings.

use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::budget::config::BudgetConfig;
use crate::error::{BotError, BotResult};

#[derive(Debug)]
struct Totals {
    run_cents: f64,
    daily_cents: f64,
    day: NaiveDate,
}

/// Thread-safe spend tracker.
///
/// [`allow`](BudgetLedger::allow) is a pure projection: it answers whether a
/// candidate call would fit under both ceilings without mutating anything.
/// [`spend`](BudgetLedger::spend) records actual usage unconditionally, even
/// when it pushes a total past its ceiling; real spend already happened and
/// must be visible to the next `allow`. The daily total rolls over when the
/// UTC date changes.
#[derive(Debug)]
pub struct BudgetLedger {
    config: BudgetConfig,
    totals: Mutex<Totals>,
}

impl BudgetLedger {
    /// Create a ledger with zeroed totals.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            totals: Mutex::new(Totals {
                run_cents: 0.0,
                daily_cents: 0.0,
                day: Utc::now().date_naive(),
            }),
        }
    }

    /// The configuration this ledger enforces.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Whether a call with the projected token counts would fit under both
    /// ceilings. Does not record anything.
    pub fn allow(&self, model: &str, tokens_in: u64, tokens_out: u64) -> bool {
        let cost = self.config.prices.price(model).cost(tokens_in, tokens_out);
        let totals = self.lock_totals();

        let run_ok = !ceiling_active(self.config.run_ceiling_cents)
            || totals.run_cents + cost <= self.config.run_ceiling_cents;
        let daily_cents = if totals.day == Utc::now().date_naive() {
            totals.daily_cents
        } else {
            0.0
        };
        let daily_ok = !ceiling_active(self.config.daily_ceiling_cents)
            || daily_cents + cost <= self.config.daily_ceiling_cents;

        if !(run_ok && daily_ok) {
            debug!(
                model,
                cost_cents = cost,
                run_cents = totals.run_cents,
                daily_cents,
                "budget projection rejected"
            );
        }
        run_ok && daily_ok
    }

    /// Record actual usage for a completed call.
    ///
    /// Fails only when the configured price for the model is invalid; the
    /// recording itself is unconditional.
    pub fn spend(&self, model: &str, tokens_in: u64, tokens_out: u64) -> BotResult<()> {
        let price = self.config.prices.price(model);
        if !price.is_valid() {
            return Err(BotError::InvalidPrice(model.to_string()));
        }
        let cost = price.cost(tokens_in, tokens_out);

        let mut totals = self.lock_totals();
        roll_day(&mut totals);
        totals.run_cents += cost;
        totals.daily_cents += cost;

        if ceiling_active(self.config.run_ceiling_cents)
            && totals.run_cents > self.config.run_ceiling_cents
        {
            warn!(
                model,
                run_cents = totals.run_cents,
                ceiling_cents = self.config.run_ceiling_cents,
                "run spend exceeded ceiling"
            );
        }
        debug!(model, cost_cents = cost, run_cents = totals.run_cents, "spend recorded");
        Ok(())
    }

    /// Remaining headroom in cents as `(run, daily)`.
    ///
    /// Values can be negative when spend overshot a ceiling. An inactive
    /// ceiling reports `f64::INFINITY`.
    pub fn remaining(&self) -> (f64, f64) {
        let mut totals = self.lock_totals();
        roll_day(&mut totals);

        let run = if ceiling_active(self.config.run_ceiling_cents) {
            self.config.run_ceiling_cents - totals.run_cents
        } else {
            f64::INFINITY
        };
        let daily = if ceiling_active(self.config.daily_ceiling_cents) {
            self.config.daily_ceiling_cents - totals.daily_cents
        } else {
            f64::INFINITY
        };
        (run, daily)
    }

    /// Total spend so far in cents as `(run, daily)`.
    pub fn spent(&self) -> (f64, f64) {
        let mut totals = self.lock_totals();
        roll_day(&mut totals);
        (totals.run_cents, totals.daily_cents)
    }

    /// Project and, if approved, record in one critical section.
    ///
    /// Useful when callers cannot tolerate another spender interleaving
    /// between their projection and their recording. Returns whether the
    /// call was approved and recorded.
    pub fn allow_and_spend(
        &self,
        model: &str,
        tokens_in: u64,
        tokens_out: u64,
    ) -> BotResult<bool> {
        let price = self.config.prices.price(model);
        if !price.is_valid() {
            return Err(BotError::InvalidPrice(model.to_string()));
        }
        let cost = price.cost(tokens_in, tokens_out);

        let mut totals = self.lock_totals();
        roll_day(&mut totals);

        let run_ok = !ceiling_active(self.config.run_ceiling_cents)
            || totals.run_cents + cost <= self.config.run_ceiling_cents;
        let daily_ok = !ceiling_active(self.config.daily_ceiling_cents)
            || totals.daily_cents + cost <= self.config.daily_ceiling_cents;
        if !(run_ok && daily_ok) {
            return Ok(false);
        }

        totals.run_cents += cost;
        totals.daily_cents += cost;
        Ok(true)
    }

    /// Reset the per-run total at the start of a new pipeline run.
    pub fn reset_run(&self) {
        let mut totals = self.lock_totals();
        totals.run_cents = 0.0;
    }

    fn lock_totals(&self) -> std::sync::MutexGuard<'_, Totals> {
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn ceiling_active(ceiling_cents: f64) -> bool {
    ceiling_cents > 0.0
}

fn roll_day(totals: &mut Totals) {
    let today = Utc::now().date_naive();
    if totals.day != today {
        totals.day = today;
        totals.daily_cents = 0.0;
    }
}
