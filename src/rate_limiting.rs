//! Optional rate limiting for backend fallthroughs (spec.md §11 supplement,
//! `feature = "rate-limiting"`).
//!
//! Rate limits apply only on the path that would contact a [`Backend`],
//! i.e. a MISS or REVALIDATE — a HIT never touches the limiter. Grounded on
//! the teacher's `rate_limiting` module, generalized from per-domain keying
//! to per-storage-key keying since this crate's [`Executor`] already
//! produces a canonical key for every request (spec §4.1) that is a finer,
//! and strictly more useful, unit to rate-limit than the host alone.
//!
//! [`Backend`]: crate::executor::Backend
//! [`Executor`]: crate::executor::Executor

use async_trait::async_trait;

pub use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState},
    DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter,
};

/// Gates backend fallthroughs by cache key (or any caller-chosen string).
#[async_trait]
pub trait CacheAwareRateLimiter: Send + Sync + 'static {
    /// Blocks until a request for `key` is allowed to proceed.
    async fn until_key_ready(&self, key: &str);

    /// Returns `true` if a request for `key` would be allowed immediately.
    fn check_key(&self, key: &str) -> bool;
}

/// Limits backend fallthroughs per cache key, e.g. one quota per origin
/// when keyed by `target_host`, or a finer quota per canonical URI.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl KeyedRateLimiter {
    /// Builds a keyed limiter enforcing `quota` independently per key.
    #[must_use]
    pub fn new(quota: Quota) -> Self {
        Self { limiter: DefaultKeyedRateLimiter::keyed(quota) }
    }
}

#[async_trait]
impl CacheAwareRateLimiter for KeyedRateLimiter {
    async fn until_key_ready(&self, key: &str) {
        self.limiter.until_key_ready(&key.to_string()).await;
    }

    fn check_key(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}

/// Limits backend fallthroughs globally, ignoring the key.
#[derive(Debug)]
pub struct DirectRateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl DirectRateLimiter {
    /// Builds a global limiter enforcing `quota` across every key.
    #[must_use]
    pub fn direct(quota: Quota) -> Self {
        Self { limiter: DefaultDirectRateLimiter::direct(quota) }
    }
}

#[async_trait]
impl CacheAwareRateLimiter for DirectRateLimiter {
    async fn until_key_ready(&self, _key: &str) {
        self.limiter.until_ready().await;
    }

    fn check_key(&self, _key: &str) -> bool {
        self.limiter.check().is_ok()
    }
}
