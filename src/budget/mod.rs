//! Spend governance for completion calls.
//!
//! Pricing is expressed in cents per 1K tokens per model. The
//! [`BudgetLedger`] projects candidate calls against per-run and per-day
//! ceilings before they are made and records actual usage afterwards; the
//! [`TokenEstimator`] supplies input-token projections for backends without
//! a tokenizer of their own.

mod config;
mod estimator;
mod ledger;

pub use config::{BudgetConfig, ModelPrice, PriceTable};
pub use estimator::TokenEstimator;
pub use ledger::BudgetLedger;
