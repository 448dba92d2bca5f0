//! Resilient outbound HTTP.
//!
//! Everything the bot sends to or fetches from the code-hosting API goes
//! through this module: retry with exponential backoff and jitter,
//! server-directed rate-limit delays, validator-cached conditional fetches,
//! and successor-link pagination.

mod cache;
mod client;
mod retry;

pub use cache::{CachedResource, ResourceCache};
pub use client::{Transport, TransportConfig};
pub use retry::RetryPolicy;
