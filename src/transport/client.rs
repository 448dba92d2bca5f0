//! Retrying HTTP client for the code-hosting API.
//!
//! All outbound calls to the host go through [`Transport`], which owns the
//! retry schedule, rate-limit handling, the per-resource validator cache,
//! and successor-link pagination. Concurrent callers share no mutable state
//! except the resource cache; each call has at most one attempt in flight.
//!
//! Status handling:
//!
//! - network failures and 5xx: exponential backoff per [`RetryPolicy`],
//!   surfacing the last error once the attempt ceiling is reached;
//! - 429: server-directed delay (`Retry-After` seconds or HTTP-date, then
//!   `X-RateLimit-Reset` epoch difference, then a fixed fallback), sharing
//!   the same attempt ceiling;
//! - anything else: returned immediately, untouched.
//!
//! Every loop iteration checks the caller's deadline before doing work and
//! never starts a sleep that would overrun it.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{truncate_body, BotError, BotResult};
use crate::transport::cache::ResourceCache;
use crate::transport::retry::RetryPolicy;

/// Accept header for diff-flavored pull request fetches.
const DIFF_ACCEPT: &str = "application/vnd.github.v3.diff";
/// Accept header for regular JSON API calls.
const JSON_ACCEPT: &str = "application/vnd.github+json";
/// Rate-limit reset header (epoch seconds).
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
/// Body bytes kept in API error messages.
const ERROR_BODY_LIMIT: usize = 256;

/// Connection settings for the code-hosting API.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the API, without trailing slash.
    pub api_base: String,
    /// Bearer token, if the deployment authenticates.
    pub token: Option<String>,
    /// User-Agent header value.
    pub user_agent: String,
    /// Per-request timeout handed to the HTTP client.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            user_agent: format!("patchbot/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API base URL.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Retrying, cache-validating client for the code-hosting API.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    config: TransportConfig,
    policy: RetryPolicy,
    cache: ResourceCache,
}

impl Transport {
    /// Build a transport from connection settings and a retry policy.
    pub fn new(config: TransportConfig, policy: RetryPolicy) -> BotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| BotError::Config(format!("http client: {err}")))?;

        Ok(Self {
            client,
            config,
            policy,
            cache: ResourceCache::new(),
        })
    }

    /// The validator cache shared by conditional fetches.
    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Resolve a path against the configured API base. Absolute URLs pass
    /// through so pagination links work unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
        }
    }

    /// Start a POST request against the configured base, with auth applied.
    /// The caller finishes the builder (headers, body) before handing it to
    /// [`send_with_retry`](Transport::send_with_retry).
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, &self.url(path))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Perform a request with retries, returning whatever terminal response
    /// the server produced. Statuses outside the retry schedule come back
    /// untouched.
    pub async fn send_with_retry<F>(
        &self,
        build: F,
        operation: &str,
        deadline: Option<Instant>,
    ) -> BotResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BotError::DeadlineExceeded(operation.to_string()));
            }
            attempt += 1;

            let failure = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt >= self.policy.max_attempts {
                            return Err(BotError::RateLimited {
                                operation: operation.to_string(),
                                attempts: attempt,
                            });
                        }
                        let delay = rate_limit_delay(response.headers())
                            .unwrap_or(self.policy.rate_limit_fallback);
                        debug!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "rate limited, honoring server delay"
                        );
                        self.sleep_bounded(delay, deadline, operation).await?;
                        continue;
                    }
                    if !status.is_server_error() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    BotError::Api {
                        operation: operation.to_string(),
                        status,
                        body: truncate_body(&body, ERROR_BODY_LIMIT),
                    }
                }
                Err(err) => BotError::Network {
                    operation: operation.to_string(),
                    source: err,
                },
            };

            if attempt >= self.policy.max_attempts {
                return Err(BotError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(failure),
                });
            }

            let delay = self.policy.backoff_delay(attempt - 1);
            debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient failure, backing off"
            );
            self.sleep_bounded(delay, deadline, operation).await?;
        }
    }

    /// Sleep for `delay` unless doing so would overrun the deadline.
    async fn sleep_bounded(
        &self,
        delay: Duration,
        deadline: Option<Instant>,
        operation: &str,
    ) -> BotResult<()> {
        if let Some(d) = deadline {
            if Instant::now() + delay >= d {
                return Err(BotError::DeadlineExceeded(operation.to_string()));
            }
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Fetch a diff-flavored resource with cache validation.
    ///
    /// `resource` is the cache identity (e.g. `octo/repo/pulls/42.diff`);
    /// the validator from the last successful fetch of the same identity is
    /// attached as `If-None-Match`. A "not modified" reply returns the
    /// cached payload unchanged; "not modified" with no prior entry is a
    /// protocol violation.
    pub async fn fetch_diff(
        &self,
        resource: &str,
        path: &str,
        deadline: Option<Instant>,
    ) -> BotResult<Arc<str>> {
        let operation = format!("fetch diff {resource}");
        let url = self.url(path);
        let validator = self.cache.validator(resource);

        let response = self
            .send_with_retry(
                || {
                    let mut builder = self
                        .request(Method::GET, &url)
                        .header(header::ACCEPT, DIFF_ACCEPT);
                    if let Some(tag) = &validator {
                        builder = builder.header(header::IF_NONE_MATCH, tag);
                    }
                    builder
                },
                &operation,
                deadline,
            )
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return self.cache.body(resource).ok_or_else(|| BotError::Protocol {
                operation,
                detail: "304 Not Modified with no cached entry".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Api {
                operation,
                status,
                body: truncate_body(&body, ERROR_BODY_LIMIT),
            });
        }

        let new_validator = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|err| BotError::Network {
            operation: operation.clone(),
            source: err,
        })?;

        if let Some(tag) = new_validator {
            self.cache.store(resource, tag, body.clone());
            // Serve from the cache so callers share one allocation.
            if let Some(cached) = self.cache.body(resource) {
                return Ok(cached);
            }
        }
        Ok(Arc::from(body))
    }

    /// Fetch a list endpoint, following `Link: <url>; rel="next"` headers
    /// and concatenating page items in order.
    pub async fn get_paginated(
        &self,
        path: &str,
        deadline: Option<Instant>,
    ) -> BotResult<Vec<serde_json::Value>> {
        let operation = format!("list {path}");
        let mut items = Vec::new();
        let mut next = Some(self.url(path));

        while let Some(url) = next {
            let response = self
                .send_with_retry(
                    || {
                        self.request(Method::GET, &url)
                            .header(header::ACCEPT, JSON_ACCEPT)
                    },
                    &operation,
                    deadline,
                )
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BotError::Api {
                    operation,
                    status,
                    body: truncate_body(&body, ERROR_BODY_LIMIT),
                });
            }

            next = next_link(response.headers());
            let page: Vec<serde_json::Value> =
                response.json().await.map_err(|err| BotError::Network {
                    operation: operation.clone(),
                    source: err,
                })?;
            items.extend(page);
        }

        Ok(items)
    }

    /// POST a JSON body, returning the parsed response payload.
    pub async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        deadline: Option<Instant>,
    ) -> BotResult<serde_json::Value> {
        let operation = format!("post {path}");
        let url = self.url(path);
        let payload = serde_json::to_value(body)
            .map_err(|err| BotError::Config(format!("serialize {operation}: {err}")))?;

        let response = self
            .send_with_retry(
                || {
                    self.request(Method::POST, &url)
                        .header(header::ACCEPT, JSON_ACCEPT)
                        .json(&payload)
                },
                &operation,
                deadline,
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Api {
                operation,
                status,
                body: truncate_body(&body, ERROR_BODY_LIMIT),
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }
        response.json().await.map_err(|err| {
            warn!(operation = %operation, %err, "response body was not valid JSON");
            BotError::Protocol {
                operation,
                detail: format!("invalid JSON response: {err}"),
            }
        })
    }
}

/// Server-directed delay for a 429 response.
///
/// Priority: `Retry-After` as integer seconds, `Retry-After` as HTTP-date,
/// then the rate-limit reset timestamp relative to now.
fn rate_limit_delay(headers: &HeaderMap) -> Option<Duration> {
    if let Some(value) = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
    {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        if let Ok(when) = DateTime::parse_from_rfc2822(value) {
            let delta = when.with_timezone(&Utc) - Utc::now();
            return Some(delta.to_std().unwrap_or(Duration::ZERO));
        }
    }

    let reset = headers
        .get(RATE_LIMIT_RESET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let delta = reset - Utc::now().timestamp();
    Some(Duration::from_secs(delta.max(0) as u64))
}

/// Extract the successor URL from a `Link` header, if one is tagged "next".
fn next_link(headers: &HeaderMap) -> Option<String> {
    static URL_PART: OnceLock<Regex> = OnceLock::new();
    let url_part = URL_PART.get_or_init(|| Regex::new(r"<([^>]+)>").expect("static regex"));

    let value = headers.get(header::LINK)?.to_str().ok()?;
    for segment in value.split(',') {
        if !segment.contains(r#"rel="next""#) {
            continue;
        }
        if let Some(captures) = url_part.captures(segment) {
            return Some(captures[1].to_string());
        }
    }
    None
}
