//! Tracing subscriber bootstrap.
//!
//! The library itself only emits `tracing` events; embedding processes call
//! [`init`] once during bootstrap to get formatted output controlled by the
//! `PATCHBOT_LOG` environment variable (falling back to `RUST_LOG`).

use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "PATCHBOT_LOG";

/// Initialize the global tracing subscriber.
///
/// `default_filter` is used when neither `PATCHBOT_LOG` nor `RUST_LOG` is
/// set, e.g. `"patchbot=info"`. Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
