//! Heuristic token estimation for prompts.
//!
//! Backends that expose a real tokenizer report exact counts themselves;
//! this estimator covers the ones that do not. It deliberately
//! over-estimates slightly so budget projections err on the safe side.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// Approximate characters per token for English-heavy prompt text.
const CHARS_PER_TOKEN: f64 = 4.0;

/// Safety margin applied on top of the raw character estimate.
const OVERHEAD_FACTOR: f64 = 1.1;

/// Cached estimates are dropped wholesale past this many entries.
const CACHE_LIMIT: usize = 4096;

/// Character-count based token estimator with a bounded memo cache.
#[derive(Debug, Default)]
pub struct TokenEstimator {
    cache: RwLock<HashMap<u64, u64>>,
}

impl TokenEstimator {
    /// Create an estimator with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate the token count of a piece of prompt text.
    pub fn estimate(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }

        let key = content_key(text);
        {
            let cache = self
                .cache
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(&tokens) = cache.get(&key) {
                return tokens;
            }
        }

        let raw = text.chars().count() as f64 / CHARS_PER_TOKEN;
        let tokens = (raw * OVERHEAD_FACTOR).ceil() as u64;

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(key, tokens);
        tokens
    }

    /// Estimate the combined token count of several prompt parts.
    pub fn estimate_parts<'a>(&self, parts: impl IntoIterator<Item = &'a str>) -> u64 {
        parts.into_iter().map(|part| self.estimate(part)).sum()
    }
}

fn content_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
