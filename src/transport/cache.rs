//! Validator (ETag) cache for conditional fetches.
//!
//! Each cacheable resource is keyed by its identity (e.g.
//! `owner/repo/pulls/42.diff`) and holds the validator token from the last
//! successful fetch together with the payload that fetch produced. The
//! transport attaches the validator as `If-None-Match` on the next request
//! for the same resource; a "not modified" reply then returns the cached
//! payload without re-downloading or re-parsing.
//!
//! A validator is only ever attached to a request for the resource identity
//! that produced it. A "not modified" reply with no existing cache entry is
//! a protocol violation, handled by the transport, not here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cached representation of one resource.
#[derive(Debug, Clone)]
pub struct CachedResource {
    /// Opaque validator token (ETag) the server attached to this payload.
    pub validator: String,
    /// The payload the validated fetch produced.
    pub body: Arc<str>,
}

/// Shared per-resource cache of validators and payloads.
///
/// Entries are created or overwritten on every successful fetch and never
/// explicitly deleted; the cache lives for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct ResourceCache {
    inner: Arc<RwLock<HashMap<String, CachedResource>>>,
}

impl ResourceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator for a resource, if one is cached.
    pub fn validator(&self, resource: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(resource)
            .map(|entry| entry.validator.clone())
    }

    /// Cached payload for a resource, if present.
    pub fn body(&self, resource: &str) -> Option<Arc<str>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(resource)
            .map(|entry| Arc::clone(&entry.body))
    }

    /// Store or replace the entry for a resource.
    pub fn store(&self, resource: &str, validator: String, body: String) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.insert(
            resource.to_string(),
            CachedResource {
                validator,
                body: Arc::from(body),
            },
        );
    }

    /// Number of cached resources.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
