//! Delivery deduplication.
//!
//! Webhook deliveries may be redelivered by the upstream host (retries,
//! manual redelivery, duplicate events). The [`DeliveryCache`] tracks which
//! opaque delivery ids have already been accepted so each pipeline runs at
//! most once per delivery while the entry is live.
//!
//! Entries expire after a TTL. An optional capacity bound evicts the single
//! oldest-inserted entry on overflow, regardless of its remaining TTL. A
//! background sweeper periodically removes expired entries; expiry is also
//! checked on read, so an expired entry is logically absent even before a
//! sweep physically removes it.
//!
//! All state is in-memory and lost on restart. That is an accepted
//! limitation: the upstream host retries deliveries, and pipelines are
//! individually idempotent enough to survive a rare duplicate after a crash.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

/// Configuration for the delivery cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// How long an accepted delivery id stays live.
    /// Default: 1 hour.
    pub ttl: Duration,

    /// Maximum number of live entries. `None` disables the bound.
    /// Default: 10 000.
    pub capacity: Option<usize>,

    /// Interval between background sweeps of expired entries.
    /// Default: half the TTL.
    pub sweep_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        let ttl = Duration::from_secs(3600);
        Self {
            ttl,
            capacity: Some(10_000),
            sweep_interval: ttl / 2,
        }
    }
}

impl DedupConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL. Also rescales the sweep interval to TTL/2.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self.sweep_interval = ttl / 2;
        self
    }

    /// Set the capacity bound. `None` disables eviction.
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the sweep interval explicitly.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Map plus insertion-order queue, guarded together.
#[derive(Debug, Default)]
struct CacheInner {
    /// Delivery id -> expiry instant.
    entries: HashMap<String, Instant>,
    /// Keys in insertion order, oldest first. Holds exactly one position
    /// per map entry: re-admitting an expired key drops its stale position
    /// before the fresh one is queued. `evict_oldest` still skips keys
    /// absent from the map.
    order: VecDeque<String>,
}

impl CacheInner {
    fn evict_oldest(&mut self) {
        while let Some(key) = self.order.pop_front() {
            if self.entries.remove(&key).is_some() {
                break;
            }
        }
    }
}

/// Idempotency cache for webhook delivery ids.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct DeliveryCache {
    config: DedupConfig,
    inner: Arc<RwLock<CacheInner>>,
    stop_flag: Arc<AtomicBool>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DeliveryCache {
    /// Create a new cache with the given configuration.
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(CacheInner::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Atomically check whether `key` was already accepted, recording it if
    /// not.
    ///
    /// Returns `false` the first time a key is seen (the key is recorded
    /// with the configured TTL) and `true` on every subsequent call while
    /// the entry is live. The check-and-set is a single critical section, so
    /// two concurrent identical keys cannot both observe `false`.
    pub fn seen_or_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(expires_at) = inner.entries.get(key) {
            if *expires_at > now {
                return true;
            }
            // Expired entry: logically absent, treat as first sight. Its
            // stale deque position must go too, or it would later alias
            // the fresh insertion and evict it out of order.
            inner.order.retain(|queued| queued != key);
        }

        inner
            .entries
            .insert(key.to_string(), now + self.config.ttl);
        inner.order.push_back(key.to_string());

        if let Some(capacity) = self.config.capacity {
            while inner.entries.len() > capacity {
                inner.evict_oldest();
            }
        }

        false
    }

    /// Pure membership check; does not record the key.
    pub fn contains(&self, key: &str) -> bool {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner
            .entries
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Number of physically present entries (expired-but-unswept included).
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entries
            .len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.entries.clear();
        inner.order.clear();
    }

    /// Physically remove expired entries. Returns how many were purged.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = inner.entries.len();
        inner.entries.retain(|_, expires_at| *expires_at > now);
        let live: std::collections::HashSet<String> =
            inner.entries.keys().cloned().collect();
        inner.order.retain(|key| live.contains(key));
        before - inner.entries.len()
    }

    /// Spawn the background sweep task.
    ///
    /// The task purges expired entries every `sweep_interval` until
    /// [`stop`](Self::stop) is called. Spawning twice replaces the previous
    /// task's handle; the old task observes the stop flag reset and keeps
    /// running against the same shared state, which is harmless.
    pub fn spawn_sweeper(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);

        let cache = self.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let interval = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let purged = cache.sweep();
                if purged > 0 {
                    debug!(purged, "swept expired delivery ids");
                }
            }
        });

        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = sweeper.replace(handle) {
            old.abort();
        }
    }

    /// Stop the background sweep task.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let mut sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_ttl(ttl: Duration) -> DeliveryCache {
        DeliveryCache::new(DedupConfig::new().with_ttl(ttl).with_capacity(None))
    }

    #[test]
    fn test_first_sight_returns_false() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(!cache.seen_or_insert("delivery-1"));
    }

    #[test]
    fn test_second_sight_returns_true() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(!cache.seen_or_insert("delivery-1"));
        assert!(cache.seen_or_insert("delivery-1"));
        assert!(cache.seen_or_insert("delivery-1"));
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(!cache.seen_or_insert("delivery-1"));
        assert!(!cache.seen_or_insert("delivery-2"));
        assert!(cache.contains("delivery-1"));
        assert!(cache.contains("delivery-2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entry_is_logically_absent() {
        let cache = cache_with_ttl(Duration::from_millis(10));
        assert!(!cache.seen_or_insert("delivery-1"));
        std::thread::sleep(Duration::from_millis(25));

        // No sweep has run, but the entry must already read as absent.
        assert!(!cache.contains("delivery-1"));
        assert!(!cache.seen_or_insert("delivery-1"));
    }

    #[test]
    fn test_capacity_evicts_single_oldest() {
        let cache = DeliveryCache::new(
            DedupConfig::new()
                .with_ttl(Duration::from_secs(60))
                .with_capacity(Some(3)),
        );
        for key in ["a", "b", "c", "d"] {
            assert!(!cache.seen_or_insert(key));
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_eviction_ignores_ttl_state() {
        // The oldest entry goes even though it has plenty of TTL left.
        let cache = DeliveryCache::new(
            DedupConfig::new()
                .with_ttl(Duration::from_secs(3600))
                .with_capacity(Some(1)),
        );
        assert!(!cache.seen_or_insert("old"));
        assert!(!cache.seen_or_insert("new"));
        assert!(!cache.contains("old"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn test_readmitted_key_is_not_the_eviction_victim() {
        // Expire two keys, re-admit one, then overflow capacity. The
        // re-admitted key is the newest insertion and must survive; its old
        // queue position must not make it the eviction victim.
        let cache = DeliveryCache::new(
            DedupConfig::new()
                .with_ttl(Duration::from_millis(10))
                .with_capacity(Some(2)),
        );
        assert!(!cache.seen_or_insert("a"));
        assert!(!cache.seen_or_insert("b"));
        std::thread::sleep(Duration::from_millis(25));

        assert!(!cache.seen_or_insert("a"));
        assert!(!cache.seen_or_insert("c"));

        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_sweep_purges_expired_only() {
        let cache = cache_with_ttl(Duration::from_millis(10));
        cache.seen_or_insert("stale");
        std::thread::sleep(Duration::from_millis(25));
        cache.seen_or_insert("fresh");

        let purged = cache.sweep();
        assert_eq!(purged, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        cache.seen_or_insert("delivery-1");
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.seen_or_insert("delivery-1"));
    }

    #[test]
    fn test_reinsert_after_expiry_restarts_ttl() {
        let cache = cache_with_ttl(Duration::from_millis(30));
        assert!(!cache.seen_or_insert("delivery-1"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!cache.seen_or_insert("delivery-1"));
        assert!(cache.seen_or_insert("delivery-1"));
    }

    #[test]
    fn test_concurrent_insert_admits_exactly_once() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                cache.seen_or_insert("same-key")
            }));
        }

        let fresh = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|seen| !seen)
            .count();
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn test_background_sweeper_purges() {
        let cache = DeliveryCache::new(
            DedupConfig::new()
                .with_ttl(Duration::from_millis(10))
                .with_capacity(None)
                .with_sweep_interval(Duration::from_millis(20)),
        );
        cache.seen_or_insert("delivery-1");
        cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len(), 0);
        cache.stop();
    }
}
