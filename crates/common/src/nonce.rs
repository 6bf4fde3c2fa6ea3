//! One-time nonce reservation for replay protection.
//!
//! The shared TTL cache is the only synchronization point between concurrent
//! validators, so [`NonceCache::add`] must be a single atomic add-if-absent.
//! [`NonceGuard`] wraps the cache with a bounded timeout and fails closed: an
//! unreachable or slow cache is treated the same as a replayed nonce.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use error_stack::Report;

use crate::constants::{DEFAULT_NONCE_CACHE_TIMEOUT, NONCE_KEY_PREFIX};
use crate::error::SignatureError;

/// Shared key/value store with per-key expiry, used only for nonce records.
#[async_trait]
pub trait NonceCache: Send + Sync {
    /// Atomically inserts `key` if it is absent.
    ///
    /// Returns `Ok(true)` when the key was inserted and `Ok(false)` when it
    /// already existed, in which case the stored entry is left untouched.
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool, Report<SignatureError>>;

    /// Returns whether `key` is currently present.
    async fn exists(&self, key: &str) -> Result<bool, Report<SignatureError>>;
}

/// Process-local nonce cache with lazy expiry.
///
/// Suitable for a single server instance; replicas need a shared backend.
#[derive(Debug, Default)]
pub struct InMemoryNonceCache {
    /// Map of key -> expiry time.
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryNonceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of live and not-yet-purged entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock().retain(|_, expiry| *expiry > now);
    }
}

#[async_trait]
impl NonceCache for InMemoryNonceCache {
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool, Report<SignatureError>> {
        let mut entries = self.lock();
        let now = Instant::now();

        entries.retain(|_, expiry| *expiry > now);

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, Report<SignatureError>> {
        let now = Instant::now();
        Ok(self
            .lock()
            .get(key)
            .is_some_and(|expiry| *expiry > now))
    }
}

/// Cache key for a nonce record.
#[must_use]
pub fn nonce_key(nonce: &str) -> String {
    format!("{NONCE_KEY_PREFIX}{nonce}")
}

/// Checks and reserves nonces against a shared [`NonceCache`].
#[derive(Clone)]
pub struct NonceGuard {
    cache: Arc<dyn NonceCache>,
    timeout: Duration,
}

impl NonceGuard {
    #[must_use]
    pub fn new(cache: Arc<dyn NonceCache>) -> Self {
        Self::with_timeout(cache, DEFAULT_NONCE_CACHE_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(cache: Arc<dyn NonceCache>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    /// Reserves `nonce` for `ttl`.
    ///
    /// Returns `true` only if this call created the record. A nonce that is
    /// already present, a cache error, or a timeout all return `false`.
    pub async fn reserve(&self, nonce: &str, ttl: Duration) -> bool {
        let key = nonce_key(nonce);
        match tokio::time::timeout(self.timeout, self.cache.add(&key, ttl)).await {
            Ok(Ok(inserted)) => inserted,
            Ok(Err(report)) => {
                log::warn!("nonce cache unavailable, rejecting nonce: {report:?}");
                false
            }
            Err(_) => {
                log::warn!(
                    "nonce cache timed out after {:?}, rejecting nonce",
                    self.timeout
                );
                false
            }
        }
    }

    /// Read-only check whether `nonce` has been consumed.
    ///
    /// Errors and timeouts report the nonce as consumed.
    pub async fn is_consumed(&self, nonce: &str) -> bool {
        let key = nonce_key(nonce);
        match tokio::time::timeout(self.timeout, self.cache.exists(&key)).await {
            Ok(Ok(present)) => present,
            Ok(Err(report)) => {
                log::warn!("nonce cache unavailable, treating nonce as used: {report:?}");
                true
            }
            Err(_) => {
                log::warn!(
                    "nonce cache timed out after {:?}, treating nonce as used",
                    self.timeout
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnavailableCache;

    #[async_trait]
    impl NonceCache for UnavailableCache {
        async fn add(&self, _key: &str, _ttl: Duration) -> Result<bool, Report<SignatureError>> {
            Err(Report::new(SignatureError::NonceCache {
                message: "connection refused".into(),
            }))
        }

        async fn exists(&self, _key: &str) -> Result<bool, Report<SignatureError>> {
            Err(Report::new(SignatureError::NonceCache {
                message: "connection refused".into(),
            }))
        }
    }

    struct SlowCache;

    #[async_trait]
    impl NonceCache for SlowCache {
        async fn add(&self, _key: &str, _ttl: Duration) -> Result<bool, Report<SignatureError>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(true)
        }

        async fn exists(&self, _key: &str) -> Result<bool, Report<SignatureError>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(false)
        }
    }

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn new_nonce_is_reserved_once() {
        let guard = NonceGuard::new(Arc::new(InMemoryNonceCache::new()));

        assert!(!guard.is_consumed("svc:1").await);
        assert!(guard.reserve("svc:1", TTL).await);
        assert!(guard.is_consumed("svc:1").await);
        assert!(!guard.reserve("svc:1", TTL).await);
        assert!(guard.reserve("svc:2", TTL).await);
    }

    #[tokio::test]
    async fn records_use_prefixed_keys() {
        let cache = Arc::new(InMemoryNonceCache::new());
        let guard = NonceGuard::new(cache.clone());

        assert!(guard.reserve("svc:1", TTL).await);
        assert!(cache
            .exists("nonce:svc:1")
            .await
            .expect("in-memory cache should not fail"));
        assert!(!cache
            .exists("svc:1")
            .await
            .expect("in-memory cache should not fail"));
    }

    #[tokio::test]
    async fn expired_nonce_can_be_reserved_again() {
        let cache = Arc::new(InMemoryNonceCache::new());
        let guard = NonceGuard::new(cache.clone());

        assert!(guard.reserve("svc:1", Duration::from_millis(10)).await);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!guard.is_consumed("svc:1").await);
        cache.purge_expired();
        assert!(cache.is_empty());
        assert!(guard.reserve("svc:1", TTL).await);
    }

    #[tokio::test]
    async fn unavailable_cache_fails_closed() {
        let guard = NonceGuard::new(Arc::new(UnavailableCache));

        assert!(!guard.reserve("svc:1", TTL).await);
        assert!(guard.is_consumed("svc:1").await);
    }

    #[tokio::test]
    async fn slow_cache_fails_closed() {
        let guard = NonceGuard::with_timeout(Arc::new(SlowCache), Duration::from_millis(20));

        assert!(!guard.reserve("svc:1", TTL).await);
        assert!(guard.is_consumed("svc:1").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_admit_exactly_one() {
        let guard = NonceGuard::new(Arc::new(InMemoryNonceCache::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.reserve("svc:shared", TTL).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.expect("reservation task should not panic") {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
