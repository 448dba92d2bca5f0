//! Crate-wide error taxonomy.
//!
//! Errors are grouped by how callers should react to them:
//!
//! - **Transient** (`Network`, `RateLimited`): retried internally by the
//!   transport and only surface wrapped in `RetriesExhausted`.
//! - **Cancellation** (`DeadlineExceeded`): surfaces immediately so callers
//!   can decide whether to retry at a higher level.
//! - **Fatal** (`Protocol`, `BudgetExceeded`, `InvalidPrice`, `Config`):
//!   never retried.
//! - **Aggregate** (`AllProvidersFailed`): wraps the final cause of a
//!   completion chain where every candidate failed.
//!
//! Each variant carries enough context (operation, resource or provider
//! identity) to diagnose without a stack trace.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type used throughout the crate.
pub type BotResult<T> = Result<T, BotError>;

/// Errors produced by the resilience layer.
#[derive(Error, Debug)]
pub enum BotError {
    /// Network-level failure (connect, timeout, TLS) during an outbound call.
    #[error("network error during {operation}: {source}")]
    Network {
        /// Operation being performed when the failure occurred.
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status that is not handled by the retry schedule.
    #[error("{operation} returned HTTP {status}: {body}")]
    Api {
        /// Operation being performed.
        operation: String,
        /// Status code returned by the server.
        status: StatusCode,
        /// Response body, truncated by the caller.
        body: String,
    },

    /// The server signalled rate limiting and the attempt ceiling ran out.
    #[error("rate limited during {operation} after {attempts} attempts")]
    RateLimited {
        /// Operation being performed.
        operation: String,
        /// Attempts consumed before giving up.
        attempts: u32,
    },

    /// Retryable failures exhausted the attempt ceiling.
    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Operation being performed.
        operation: String,
        /// Attempts consumed.
        attempts: u32,
        /// The last error observed before giving up.
        #[source]
        source: Box<BotError>,
    },

    /// The caller's deadline elapsed or the call was cancelled.
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(String),

    /// The upstream violated the protocol (e.g. 304 with no cached entry).
    #[error("protocol violation during {operation}: {detail}")]
    Protocol {
        /// Operation being performed.
        operation: String,
        /// What the upstream did wrong.
        detail: String,
    },

    /// The budget ledger rejected the projected spend.
    ///
    /// Deliberately distinct from provider failure so the orchestrator does
    /// not fail over to a fallback that would also be gated.
    #[error("budget exceeded for model {model}: {reason}")]
    BudgetExceeded {
        /// Priced model key that was rejected.
        model: String,
        /// Which ceiling rejected it.
        reason: String,
    },

    /// A single completion backend failed.
    #[error("provider {provider} failed: {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Normalized failure description.
        message: String,
    },

    /// Every candidate in the completion chain failed.
    #[error("all {attempts} completion providers failed")]
    AllProvidersFailed {
        /// Number of candidates tried.
        attempts: usize,
        /// The final candidate's error.
        #[source]
        source: Box<BotError>,
    },

    /// A price table entry is structurally invalid (negative or non-finite).
    #[error("invalid price entry for model {0}")]
    InvalidPrice(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// Whether the transport should retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            BotError::Network { .. } => true,
            BotError::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Whether this error represents a timeout or cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BotError::DeadlineExceeded(_))
    }

    /// Whether this error is a budget rejection.
    pub fn is_budget(&self) -> bool {
        matches!(self, BotError::BudgetExceeded { .. })
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}

/// Truncate a response body for inclusion in error messages.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        body.to_string()
    } else {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_is_retryable() {
        let err = BotError::Api {
            operation: "fetch diff".to_string(),
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_error_is_not_retryable() {
        let err = BotError::Api {
            operation: "fetch diff".to_string(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_budget_is_not_retryable() {
        let err = BotError::BudgetExceeded {
            model: "claude-sonnet".to_string(),
            reason: "daily ceiling".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_budget());
    }

    #[test]
    fn test_deadline_is_timeout() {
        let err = BotError::DeadlineExceeded("completion".to_string());
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "héllo wörld";
        let truncated = truncate_body(body, 3);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 6);
    }
}
