//! Cross-cutting configuration (spec §6 "Configuration (enumerated)") plus
//! the supplemented per-deployment override points (spec.md §11 of
//! `SPEC_FULL.md`): custom cache keys and cache busting, mirroring the
//! teacher's `HttpCacheOptions::cache_key` / `cache_bust`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::executor::CacheRequest;

/// A closure overriding the default canonical-URI cache key (spec §4.1)
/// for deployments that key differently (e.g. including a tenant header).
/// Receives the target host and request; returns the storage key to use in
/// place of [`crate::key::canonical_key`]'s output.
pub type CacheKeyFn = Arc<dyn Fn(&str, &CacheRequest) -> String + Send + Sync>;

/// A closure naming extra storage keys to invalidate alongside the
/// automatic C5 invalidation targets (request URI, same-host
/// `Content-Location`/`Location`). Returning an empty vector performs no
/// additional busting.
pub type CacheBustFn = Arc<dyn Fn(&CacheRequest) -> Vec<String> + Send + Sync>;

/// Cross-cutting configuration for the cache protocol engine (spec §6).
#[derive(Clone)]
pub struct Config {
    /// Whether this cache is shared (governs `s-maxage` and `private`
    /// handling, spec §4.3/§4.5.1).
    pub shared_cache: bool,
    /// Storage hint: maximum number of entries the reference
    /// [`crate::storage::InMemoryStorage`] will retain.
    pub max_cache_entries: usize,
    /// Responses larger than this are streamed through without being
    /// stored (spec §4.5.1).
    pub max_object_size_bytes: u64,
    /// Coefficient applied to `Date - Last-Modified` for heuristic
    /// freshness (spec §4.3 step 4). Must be within `[0, 1]`.
    pub heuristic_coefficient: f64,
    /// Ceiling on the `Last-Modified`-derived heuristic lifetime (spec §4.3
    /// step 4, "clamped to a configured maximum (default: 24 h)").
    pub heuristic_max_lifetime_seconds: i64,
    /// Flat heuristic lifetime applied only to responses whose status is in
    /// [`Self::heuristic_cacheable_statuses`] and which carry no
    /// `Last-Modified` (spec §4.3 step 4, §9 "must be configured, not
    /// hard-coded").
    pub heuristic_default_lifetime_seconds: i64,
    /// The statuses eligible for [`Self::heuristic_default_lifetime_seconds`].
    /// Empty by default: heuristic freshness applies only via
    /// `Last-Modified` until a deployment opts specific statuses in.
    pub heuristic_cacheable_statuses: Vec<u16>,
    /// Gate for `stale-if-error` (spec §6, §4.5, §4.6).
    pub permit_stale_if_error: bool,
    /// Adds `x-cache`/`x-cache-lookup` convenience headers to every
    /// response, mirroring the teacher's `XCACHE`/`XCACHELOOKUP` constants.
    /// Additive to, not a replacement for, the `ExecutionContext`-based
    /// `CacheStatus` side channel spec §6 requires.
    pub cache_status_headers: bool,
    /// An additional ceiling applied to freshness lifetime after the spec
    /// §4.3 computation, mirroring the teacher's
    /// `HttpCacheOptions::max_ttl`. Most useful alongside
    /// [`crate::executor::CacheMode::IgnoreRules`].
    pub max_ttl: Option<Duration>,
    /// Overrides the default cache key (spec §4.1) when set.
    pub cache_key: Option<CacheKeyFn>,
    /// Names additional keys to bust alongside the automatic C5
    /// invalidation targets.
    pub cache_bust: Option<CacheBustFn>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("shared_cache", &self.shared_cache)
            .field("max_cache_entries", &self.max_cache_entries)
            .field("max_object_size_bytes", &self.max_object_size_bytes)
            .field("heuristic_coefficient", &self.heuristic_coefficient)
            .field("heuristic_max_lifetime_seconds", &self.heuristic_max_lifetime_seconds)
            .field("heuristic_default_lifetime_seconds", &self.heuristic_default_lifetime_seconds)
            .field("heuristic_cacheable_statuses", &self.heuristic_cacheable_statuses)
            .field("permit_stale_if_error", &self.permit_stale_if_error)
            .field("cache_status_headers", &self.cache_status_headers)
            .field("max_ttl", &self.max_ttl)
            .field("cache_key", &self.cache_key.as_ref().map(|_| "Fn(..)"))
            .field("cache_bust", &self.cache_bust.as_ref().map(|_| "Fn(..)"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_cache: true,
            max_cache_entries: 10_000,
            max_object_size_bytes: 8 * 1024 * 1024,
            heuristic_coefficient: 0.1,
            heuristic_max_lifetime_seconds: 24 * 60 * 60,
            heuristic_default_lifetime_seconds: 0,
            heuristic_cacheable_statuses: Vec::new(),
            permit_stale_if_error: true,
            cache_status_headers: true,
            max_ttl: None,
            cache_key: None,
            cache_bust: None,
        }
    }
}

/// Builds a [`Config`], validating it at construction time per spec §7
/// `ConfigError` ("raised at construction if configuration is
/// inconsistent").
#[derive(Clone, Default, Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts from [`Config::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`Config::shared_cache`].
    #[must_use]
    pub fn shared_cache(mut self, shared: bool) -> Self {
        self.config.shared_cache = shared;
        self
    }

    /// Sets [`Config::max_cache_entries`].
    #[must_use]
    pub fn max_cache_entries(mut self, max: usize) -> Self {
        self.config.max_cache_entries = max;
        self
    }

    /// Sets [`Config::max_object_size_bytes`].
    #[must_use]
    pub fn max_object_size_bytes(mut self, max: u64) -> Self {
        self.config.max_object_size_bytes = max;
        self
    }

    /// Sets [`Config::heuristic_coefficient`].
    #[must_use]
    pub fn heuristic_coefficient(mut self, coefficient: f64) -> Self {
        self.config.heuristic_coefficient = coefficient;
        self
    }

    /// Sets [`Config::heuristic_max_lifetime_seconds`].
    #[must_use]
    pub fn heuristic_max_lifetime_seconds(mut self, seconds: i64) -> Self {
        self.config.heuristic_max_lifetime_seconds = seconds;
        self
    }

    /// Sets [`Config::heuristic_default_lifetime_seconds`] and the statuses
    /// it applies to.
    #[must_use]
    pub fn heuristic_defaults(mut self, seconds: i64, statuses: Vec<u16>) -> Self {
        self.config.heuristic_default_lifetime_seconds = seconds;
        self.config.heuristic_cacheable_statuses = statuses;
        self
    }

    /// Sets [`Config::permit_stale_if_error`].
    #[must_use]
    pub fn permit_stale_if_error(mut self, permit: bool) -> Self {
        self.config.permit_stale_if_error = permit;
        self
    }

    /// Sets [`Config::cache_status_headers`].
    #[must_use]
    pub fn cache_status_headers(mut self, enabled: bool) -> Self {
        self.config.cache_status_headers = enabled;
        self
    }

    /// Sets [`Config::max_ttl`].
    #[must_use]
    pub fn max_ttl(mut self, ttl: Duration) -> Self {
        self.config.max_ttl = Some(ttl);
        self
    }

    /// Sets [`Config::cache_key`].
    #[must_use]
    pub fn cache_key(mut self, f: CacheKeyFn) -> Self {
        self.config.cache_key = Some(f);
        self
    }

    /// Sets [`Config::cache_bust`].
    #[must_use]
    pub fn cache_bust(mut self, f: CacheBustFn) -> Self {
        self.config.cache_bust = Some(f);
        self
    }

    /// Validates and builds the [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if `max_cache_entries` is `0`, if
    /// `heuristic_coefficient` is outside `[0, 1]`, or if any configured
    /// duration is negative.
    pub fn build(self) -> Result<Config, CacheError> {
        let config = self.config;
        if config.max_cache_entries == 0 {
            return Err(CacheError::Config("max_cache_entries must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&config.heuristic_coefficient) {
            return Err(CacheError::Config("heuristic_coefficient must be within [0, 1]".into()));
        }
        if config.heuristic_max_lifetime_seconds < 0 {
            return Err(CacheError::Config(
                "heuristic_max_lifetime_seconds must not be negative".into(),
            ));
        }
        if config.heuristic_default_lifetime_seconds < 0 {
            return Err(CacheError::Config(
                "heuristic_default_lifetime_seconds must not be negative".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds() {
        assert!(ConfigBuilder::new().build().is_ok());
    }

    #[test]
    fn zero_max_entries_is_a_config_error() {
        let err = ConfigBuilder::new().max_cache_entries(0).build().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }

    #[test]
    fn out_of_range_heuristic_coefficient_is_a_config_error() {
        let err = ConfigBuilder::new().heuristic_coefficient(1.5).build().unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
