//! Cache Executor (spec §4.5, C6).
//!
//! Orchestrates C1 (key), C2 (storage), C3 (entry), C4 (freshness) and C5
//! (invalidate) into the request-handling state machine spec §4.5 lays out:
//! pass-through, HIT, REVALIDATE and MISS, plus the `only-if-cached`
//! synthesized 504 and the `CacheMode` overrides spec.md §11 supplements
//! (grounded in the teacher's `HttpCacheOptions`/`CacheMode`).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};

use crate::config::Config;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::freshness;
use crate::headers::{parse_request_cache_control, parse_response_cache_control, HeaderList, RequestCacheControl};
use crate::invalidate;
use crate::key;
use crate::storage::CacheStorage;

/// An outbound request as the executor sees it: just enough of HTTP/1.1 to
/// derive a cache key, evaluate suitability and, on a miss, hand to a
/// [`Backend`]. Transport framing, connection reuse and retries are a
/// transport concern outside this crate's scope (spec §1).
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// The request method.
    pub method: Method,
    /// The request's target host, e.g. `"example.com"` or
    /// `"https://example.com"` when the scheme is already known.
    pub target_host: String,
    /// The request-target: an origin-form path+query, or an absolute URI.
    pub request_target: String,
    /// The request headers.
    pub headers: HeaderList,
    /// The request body, if any.
    pub body: Option<Bytes>,
}

/// A response as the executor sees it, whether synthesized from a cached
/// entry or returned directly from a [`Backend`].
#[derive(Debug, Clone)]
pub struct CacheResponse {
    /// The response status.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderList,
    /// The response body, if any.
    pub body: Option<Bytes>,
}

/// The outcome recorded on [`ExecutionContext::cache_status`] after a call to
/// [`Executor::execute`] (spec §4.5, §6: "reported via an out-of-band
/// execution-context side channel rather than a response header").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No usable stored entry; the backend was (or would have been)
    /// contacted and its response, if any, is what was returned.
    Miss,
    /// A fresh or permissibly-stale stored entry was served without
    /// contacting the backend.
    Hit,
    /// A stored entry was revalidated against the backend and confirmed
    /// current via a 304 response.
    Validated,
    /// No usable entry existed and the backend could not be contacted
    /// (`only-if-cached`), or revalidation failed without a stale-if-error
    /// recovery.
    Failure,
}

/// Per-deployment override of the default spec §4.5 policy, mirroring the
/// teacher's `CacheMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Standard RFC 7234 behavior.
    #[default]
    Default,
    /// Never reads or writes the cache.
    NoStore,
    /// Always contacts the backend; still stores the response.
    Reload,
    /// Always revalidates a stored entry before use.
    NoCache,
    /// Serves a stored entry regardless of staleness; contacts the backend
    /// only when no entry exists.
    ForceCache,
    /// Serves a stored entry regardless of staleness; never contacts the
    /// backend. Synthesizes a 504 when no entry exists.
    OnlyIfCached,
    /// Stores every 2xx response regardless of cache-control headers, and
    /// serves stored entries regardless of staleness.
    IgnoreRules,
}

/// Threaded through a call to [`Executor::execute`]: carries the requested
/// [`CacheMode`], the clock the suitability evaluator runs against, and the
/// out-of-band [`CacheStatus`]/served-entry side channel spec §6 calls for.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The cache mode in effect for this request.
    pub mode: CacheMode,
    /// The instant suitability decisions are evaluated against. Defaults to
    /// the wall clock at construction; tests set this explicitly for
    /// reproducible age arithmetic.
    pub now: SystemTime,
    /// Set by [`Executor::execute`] on return.
    pub cache_status: Option<CacheStatus>,
    /// The stored entry that produced the response, when one was served or
    /// validated. Absent on a miss or pass-through.
    pub served_entry: Option<CacheEntry>,
    /// Cooperative cancellation, checked before contacting the backend.
    pub cancelled: Option<Arc<std::sync::atomic::AtomicBool>>,
}

impl ExecutionContext {
    /// A context with the given mode and the current wall-clock time.
    #[must_use]
    pub fn new(mode: CacheMode) -> Self {
        Self { mode, now: SystemTime::now(), cache_status: None, served_entry: None, cancelled: None }
    }

    /// A context with the given mode and an explicit clock, for
    /// reproducible tests.
    #[must_use]
    pub fn at(mode: CacheMode, now: SystemTime) -> Self {
        Self { mode, now, cache_status: None, served_entry: None, cancelled: None }
    }

    /// `true` if a [`Self::cancelled`] flag is set and has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|c| c.load(std::sync::atomic::Ordering::SeqCst))
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(CacheMode::default())
    }
}

/// The backend an [`Executor`] falls through to on a miss or revalidation.
/// Connection management, retries and wire encoding belong to the
/// implementor (spec §1 out-of-scope: "the non-caching HTTP client").
#[async_trait]
pub trait Backend: Send + Sync {
    /// Executes `request` against `target_host` and returns its response.
    async fn execute(
        &self,
        target_host: &str,
        request: &CacheRequest,
        cx: &mut ExecutionContext,
    ) -> Result<CacheResponse>;
}

const CACHEABLE_STATUSES: &[u16] = &[200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// The cache protocol engine: ties C1 through C5 together behind a single
/// [`execute`](Self::execute) entry point (spec §4.5).
pub struct Executor<S: CacheStorage> {
    storage: Arc<S>,
    config: Config,
}

impl<S: CacheStorage> std::fmt::Debug for Executor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S: CacheStorage> Executor<S> {
    /// Builds an executor over `storage` governed by `config`.
    pub fn new(storage: Arc<S>, config: Config) -> Self {
        Self { storage, config }
    }

    /// Runs the spec §4.5 state machine for `request`, falling through to
    /// `backend` on a miss or revalidation. On return, `cx.cache_status` and
    /// `cx.served_entry` report what happened.
    pub async fn execute(
        &self,
        request: CacheRequest,
        backend: &dyn Backend,
        cx: &mut ExecutionContext,
    ) -> Result<CacheResponse> {
        if cx.is_cancelled() {
            return Err(CacheError::Cancellation);
        }

        let request_cc = parse_request_cache_control(&request.headers);
        let only_if_cached = request_cc.only_if_cached || cx.mode == CacheMode::OnlyIfCached;
        let is_get_or_head = request.method == Method::GET || request.method == Method::HEAD;
        let bypasses_cache = cx.mode == CacheMode::NoStore
            || invalidate::is_unsafe_method(&request.method)
            || request_cc.no_store
            || !is_get_or_head;

        if bypasses_cache {
            let response = self.pass_through(&request, backend, cx).await?;
            invalidate::invalidate_response(self.storage.as_ref(), &request.target_host, &request, &response)
                .await;
            self.bust(&request).await;
            cx.cache_status = Some(CacheStatus::Miss);
            cx.served_entry = None;
            return Ok(response);
        }

        if cx.mode == CacheMode::Reload {
            return self.handle_miss(request, backend, cx, false).await;
        }

        let base_key = self.cache_key(&request)?;
        let base_entry = self.read(&base_key).await;
        let (lookup_key, candidate) = self.resolve_variant(&base_key, base_entry, &request).await;

        let Some(entry) = candidate else {
            return self.handle_miss(request, backend, cx, only_if_cached).await;
        };

        if !entry.content_length_matches()
            || !entry.is_well_formed()
            || !freshness::method_matches(&entry, &request.method)
        {
            return self.handle_miss(request, backend, cx, only_if_cached).await;
        }

        match cx.mode {
            CacheMode::ForceCache | CacheMode::IgnoreRules | CacheMode::OnlyIfCached => {
                return Ok(self.serve_hit(&entry, cx, true));
            }
            CacheMode::NoCache => {
                return self.handle_revalidate(request, backend, cx, lookup_key, entry).await;
            }
            _ => {}
        }

        let response_cc = parse_response_cache_control(&entry.response_headers);
        if freshness::is_suitable(&request.method, &entry, &request_cc, &response_cc, cx.now, &self.config) {
            return Ok(self.serve_hit(&entry, cx, false));
        }

        if only_if_cached {
            return Ok(self.gateway_timeout(cx));
        }

        if entry.is_revalidatable() {
            self.handle_revalidate(request, backend, cx, lookup_key, entry).await
        } else {
            self.handle_miss(request, backend, cx, false).await
        }
    }

    async fn pass_through(
        &self,
        request: &CacheRequest,
        backend: &dyn Backend,
        cx: &mut ExecutionContext,
    ) -> Result<CacheResponse> {
        self.call_backend(request, backend, cx).await
    }

    async fn call_backend(
        &self,
        request: &CacheRequest,
        backend: &dyn Backend,
        cx: &mut ExecutionContext,
    ) -> Result<CacheResponse> {
        if cx.is_cancelled() {
            return Err(CacheError::Cancellation);
        }
        backend.execute(&request.target_host, request, cx).await
    }

    async fn handle_miss(
        &self,
        request: CacheRequest,
        backend: &dyn Backend,
        cx: &mut ExecutionContext,
        only_if_cached: bool,
    ) -> Result<CacheResponse> {
        if only_if_cached {
            return Ok(self.gateway_timeout(cx));
        }

        let request_cc = parse_request_cache_control(&request.headers);
        let request_instant = freshness::system_time_to_millis(cx.now);
        let response = self.call_backend(&request, backend, cx).await?;
        let response_instant = request_instant;

        let base_key = self.cache_key(&request)?;
        let response_cc = parse_response_cache_control(&response.headers);
        let ignore_rules = cx.mode == CacheMode::IgnoreRules;
        if self.is_cacheable(&request, &response, &request_cc, &response_cc, ignore_rules) {
            self.store_response(&base_key, &request, &response, request_instant, response_instant).await;
        }

        invalidate::invalidate_response(self.storage.as_ref(), &request.target_host, &request, &response).await;
        self.bust(&request).await;

        cx.cache_status = Some(CacheStatus::Miss);
        cx.served_entry = None;
        Ok(response)
    }

    async fn handle_revalidate(
        &self,
        request: CacheRequest,
        backend: &dyn Backend,
        cx: &mut ExecutionContext,
        lookup_key: String,
        entry: CacheEntry,
    ) -> Result<CacheResponse> {
        if !entry.is_revalidatable() {
            return self.handle_miss(request, backend, cx, false).await;
        }

        let mut conditional_headers = request.headers.clone();
        if let Some(etag) = entry.response_headers.get("etag") {
            conditional_headers.set("if-none-match", etag.to_string());
        } else if let Some(last_modified) = entry.response_headers.get("last-modified") {
            conditional_headers.set("if-modified-since", last_modified.to_string());
        }
        let conditional_request = CacheRequest { headers: conditional_headers, ..request.clone() };

        let request_cc = parse_request_cache_control(&request.headers);
        let response_cc_stored = parse_response_cache_control(&entry.response_headers);
        let age_before = freshness::current_age(&entry, cx.now);
        let (lifetime_before, _) = freshness::freshness_lifetime(entry.status, &entry, &response_cc_stored, &self.config);

        match self.call_backend(&conditional_request, backend, cx).await {
            Ok(response) if response.status == StatusCode::NOT_MODIFIED => {
                let merged = self.merge_304(&lookup_key, &entry, &response).await;
                let age = freshness::current_age(&merged, cx.now);
                let synthesized = self.synthesize_response(&merged, age, None);
                cx.cache_status = Some(CacheStatus::Validated);
                cx.served_entry = Some(merged);
                Ok(synthesized)
            }
            Ok(response) if response.status.is_server_error() => {
                if freshness::stale_if_error_permits(
                    age_before,
                    lifetime_before,
                    &request_cc,
                    &response_cc_stored,
                    &self.config,
                ) {
                    Ok(self.serve_stale_if_error(&entry, cx))
                } else {
                    cx.cache_status = Some(CacheStatus::Failure);
                    cx.served_entry = None;
                    Ok(response)
                }
            }
            Ok(response) => {
                let request_instant = freshness::system_time_to_millis(cx.now);
                let response_instant = request_instant;
                let base_key = self.cache_key(&request)?;
                let response_cc_new = parse_response_cache_control(&response.headers);
                let ignore_rules = cx.mode == CacheMode::IgnoreRules;
                if self.is_cacheable(&request, &response, &request_cc, &response_cc_new, ignore_rules) {
                    self.store_response(&base_key, &request, &response, request_instant, response_instant).await;
                }
                invalidate::invalidate_response(self.storage.as_ref(), &request.target_host, &request, &response)
                    .await;
                self.bust(&request).await;
                cx.cache_status = Some(CacheStatus::Miss);
                cx.served_entry = None;
                Ok(response)
            }
            Err(e) => {
                if freshness::stale_if_error_permits(
                    age_before,
                    lifetime_before,
                    &request_cc,
                    &response_cc_stored,
                    &self.config,
                ) {
                    log::warn!("revalidation of {lookup_key} failed, serving stale: {e}");
                    Ok(self.serve_stale_if_error(&entry, cx))
                } else {
                    cx.cache_status = Some(CacheStatus::Failure);
                    cx.served_entry = None;
                    Err(e)
                }
            }
        }
    }

    fn serve_hit(&self, entry: &CacheEntry, cx: &mut ExecutionContext, disconnected: bool) -> CacheResponse {
        let age = freshness::current_age(entry, cx.now);
        let response_cc = parse_response_cache_control(&entry.response_headers);
        let (lifetime, used_heuristic) = freshness::freshness_lifetime(entry.status, entry, &response_cc, &self.config);
        let warning = if disconnected {
            Some((112u16, "Disconnected operation"))
        } else if freshness::needs_heuristic_warning(age, used_heuristic, lifetime) {
            Some((113u16, "Heuristic Expiration"))
        } else {
            None
        };
        let mut response = self.synthesize_response(entry, age, warning);
        for field in &response_cc.no_cache_fields {
            response.headers.remove(field);
        }
        if self.config.cache_status_headers {
            response.headers.set("x-cache", "HIT");
            response.headers.set("x-cache-lookup", "HIT");
        }
        cx.cache_status = Some(CacheStatus::Hit);
        cx.served_entry = Some(entry.clone());
        response
    }

    fn serve_stale_if_error(&self, entry: &CacheEntry, cx: &mut ExecutionContext) -> CacheResponse {
        let age = freshness::current_age(entry, cx.now);
        let mut response = self.synthesize_response(entry, age, Some((110, "Response is stale")));
        if self.config.cache_status_headers {
            response.headers.set("x-cache", "HIT");
            response.headers.set("x-cache-lookup", "HIT");
        }
        cx.cache_status = Some(CacheStatus::Hit);
        cx.served_entry = Some(entry.clone());
        response
    }

    fn gateway_timeout(&self, cx: &mut ExecutionContext) -> CacheResponse {
        cx.cache_status = Some(CacheStatus::Failure);
        cx.served_entry = None;
        let mut headers = HeaderList::new();
        headers.set("content-type", "text/plain");
        if self.config.cache_status_headers {
            headers.set("x-cache", "MISS");
            headers.set("x-cache-lookup", "MISS");
        }
        CacheResponse {
            status: StatusCode::GATEWAY_TIMEOUT,
            headers,
            body: Some(Bytes::from_static(b"Gateway Timeout")),
        }
    }

    fn synthesize_response(&self, entry: &CacheEntry, age: i64, warning: Option<(u16, &str)>) -> CacheResponse {
        let mut headers = entry.response_headers.clone();
        headers.set("age", age.max(0).to_string());
        if let Some((code, text)) = warning {
            add_warning(&mut headers, &entry.request_uri, code, text);
        }
        let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
        CacheResponse { status, headers, body: entry.body.clone() }
    }

    fn cache_key(&self, request: &CacheRequest) -> Result<String> {
        match &self.config.cache_key {
            Some(f) => Ok(f(&request.target_host, request)),
            None => key::canonical_key(&request.target_host, &request.request_target),
        }
    }

    async fn read(&self, key: &str) -> Option<CacheEntry> {
        match self.storage.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("cache read failed for {key}: {e}");
                None
            }
        }
    }

    async fn resolve_variant(
        &self,
        base_key: &str,
        base_entry: Option<CacheEntry>,
        request: &CacheRequest,
    ) -> (String, Option<CacheEntry>) {
        match base_entry {
            Some(root) if root.is_variant_root() => {
                let vary_header = root.response_headers.get("vary").unwrap_or("").to_string();
                match key::variant_key(&vary_header, &request.headers) {
                    Some(variant) => {
                        let variant_storage_key = key::variant_storage_key(base_key, &variant);
                        let entry = self.read(&variant_storage_key).await;
                        (variant_storage_key, entry)
                    }
                    None => (base_key.to_string(), None),
                }
            }
            other => (base_key.to_string(), other),
        }
    }

    fn is_cacheable(
        &self,
        request: &CacheRequest,
        response: &CacheResponse,
        request_cc: &RequestCacheControl,
        response_cc: &crate::headers::ResponseCacheControl,
        ignore_rules: bool,
    ) -> bool {
        if !(request.method == Method::GET || request.method == Method::HEAD) {
            return false;
        }
        if ignore_rules {
            return response.status.is_success();
        }
        if !CACHEABLE_STATUSES.contains(&response.status.as_u16()) {
            return false;
        }
        if request_cc.no_store || response_cc.no_store {
            return false;
        }
        if response_cc.private && self.config.shared_cache {
            return false;
        }
        if let Some(vary) = response.headers.get("vary") {
            if vary.split(',').any(|v| v.trim() == "*") {
                return false;
            }
        }
        let has_freshness =
            response_cc.max_age.is_some() || response_cc.s_maxage.is_some() || response.headers.contains("expires");
        let has_validator = response.headers.contains("etag") || response.headers.contains("last-modified");
        let heuristically_cacheable = self.config.heuristic_cacheable_statuses.contains(&response.status.as_u16());
        has_freshness || has_validator || heuristically_cacheable
    }

    async fn store_response(
        &self,
        base_key: &str,
        request: &CacheRequest,
        response: &CacheResponse,
        request_instant: i64,
        response_instant: i64,
    ) {
        let body_len = response.body.as_ref().map_or(0, |b| b.len() as u64);
        if body_len > self.config.max_object_size_bytes {
            log::debug!("response for {base_key} exceeds max_object_size_bytes, not storing");
            return;
        }

        let request_headers = request.headers.without_hop_by_hop().without("authorization");
        let mut response_headers = response.headers.without_hop_by_hop();
        if !response_headers.contains("date") {
            response_headers.set("date", httpdate::fmt_http_date(SystemTime::now()));
        }
        let request_method = request.method.as_str().to_string();

        let vary = response.headers.get("vary").map(str::to_string);
        match vary {
            Some(ref v) if v.split(',').any(|p| p.trim() == "*") => {}
            Some(vary_header) => {
                let Some(variant) = key::variant_key(&vary_header, &request.headers) else { return };
                let variant_storage_key = key::variant_storage_key(base_key, &variant);

                let variant_entry = CacheEntry {
                    request_instant,
                    response_instant,
                    request_method,
                    request_uri: base_key.to_string(),
                    request_headers,
                    status: response.status.as_u16(),
                    response_headers,
                    body: response.body.clone(),
                    variants: Vec::new(),
                };
                if let Err(e) = self.storage.put(&variant_storage_key, variant_entry).await {
                    log::warn!("failed to store variant entry {variant_storage_key}: {e}");
                    return;
                }

                let existing_variants =
                    self.read(base_key).await.map(|root| root.variants).unwrap_or_default();
                let mut variants: Vec<(String, String)> =
                    existing_variants.into_iter().filter(|(v, _)| *v != variant).collect();
                variants.push((variant, variant_storage_key));

                let mut root_headers = HeaderList::new();
                root_headers.set("vary", vary_header.clone());
                let root_entry = CacheEntry {
                    request_instant,
                    response_instant,
                    request_method: request.method.as_str().to_string(),
                    request_uri: base_key.to_string(),
                    request_headers: HeaderList::new(),
                    status: response.status.as_u16(),
                    response_headers: root_headers,
                    body: None,
                    variants,
                };
                if let Err(e) = self.storage.put(base_key, root_entry).await {
                    log::warn!("failed to store variant root {base_key}: {e}");
                }
            }
            None => {
                let entry = CacheEntry {
                    request_instant,
                    response_instant,
                    request_method,
                    request_uri: base_key.to_string(),
                    request_headers,
                    status: response.status.as_u16(),
                    response_headers,
                    body: response.body.clone(),
                    variants: Vec::new(),
                };
                if let Err(e) = self.storage.put(base_key, entry).await {
                    log::warn!("failed to store entry {base_key}: {e}");
                }
            }
        }
    }

    async fn merge_304(&self, lookup_key: &str, stored: &CacheEntry, response: &CacheResponse) -> CacheEntry {
        let stored_fallback = stored.clone();
        let response_headers = response.headers.clone();
        let result = self
            .storage
            .update(
                lookup_key,
                Box::new(move |current| {
                    let base = current.cloned().unwrap_or(stored_fallback);
                    merge_headers_304(&base, &response_headers)
                }),
            )
            .await;
        match result {
            Ok(Some(merged)) => merged,
            Ok(None) => stored.clone(),
            Err(e) => {
                log::warn!("failed to publish merged 304 entry at {lookup_key}: {e}");
                stored.clone()
            }
        }
    }

    async fn bust(&self, request: &CacheRequest) {
        let Some(f) = &self.config.cache_bust else { return };
        for key in f(request) {
            invalidate::remove_with_variants(self.storage.as_ref(), &key).await;
        }
    }
}

/// Applies the spec §4.5.2 header merge for a 304 response onto `stored`.
/// Returns `None` when both sides carry a `Date` and the stored entry's is
/// newer (the date-inversion guard), leaving the stored entry published
/// unchanged.
fn merge_headers_304(stored: &CacheEntry, response_headers: &HeaderList) -> Option<CacheEntry> {
    if let (Some(stored_date), Some(response_date)) = (
        stored.response_headers.get("date").and_then(|v| httpdate::parse_http_date(v).ok()),
        response_headers.get("date").and_then(|v| httpdate::parse_http_date(v).ok()),
    ) {
        if stored_date > response_date {
            return None;
        }
    }

    let mut merged = stored.response_headers.clone();
    let mut seen = HashSet::new();
    for (name, _) in response_headers.iter() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if crate::headers::HOP_BY_HOP.contains(&name.as_str())
            || name == "content-length"
            || name == "transfer-encoding"
        {
            continue;
        }
        let values: Vec<String> = response_headers.get_all(name).map(str::to_string).collect();
        merged.remove(name);
        for value in values {
            merged.push(name, value);
        }
    }
    let merged = merged.without_1xx_warnings();

    Some(CacheEntry {
        request_instant: stored.request_instant,
        response_instant: stored.response_instant,
        request_method: stored.request_method.clone(),
        request_uri: stored.request_uri.clone(),
        request_headers: stored.request_headers.clone(),
        status: stored.status,
        response_headers: merged,
        body: stored.body.clone(),
        variants: stored.variants.clone(),
    })
}

/// Appends a `Warning` header in the `code SP agent SP "text"` form spec
/// §4.6 calls for, mirroring the teacher's `add_warning` helper.
fn add_warning(headers: &mut HeaderList, agent: &str, code: u16, text: &str) {
    let escaped = text.replace('"', "'").replace(['\n', '\r'], " ");
    headers.push("warning", format!("{code} {agent} \"{escaped}\""));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeBackend {
        responses: StdMutex<Vec<CacheResponse>>,
        calls: StdMutex<usize>,
    }

    impl FakeBackend {
        fn new(responses: Vec<CacheResponse>) -> Self {
            Self { responses: StdMutex::new(responses), calls: StdMutex::new(0) }
        }

        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn execute(
            &self,
            _target_host: &str,
            _request: &CacheRequest,
            _cx: &mut ExecutionContext,
        ) -> Result<CacheResponse> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses[0].clone())
            }
        }
    }

    fn get(path: &str) -> CacheRequest {
        CacheRequest {
            method: Method::GET,
            target_host: "example.com".into(),
            request_target: path.into(),
            headers: HeaderList::new(),
            body: None,
        }
    }

    fn ok_response(date: &str, max_age: &str, body: &str) -> CacheResponse {
        let mut headers = HeaderList::new();
        headers.push("date", date);
        headers.push("cache-control", format!("max-age={max_age}"));
        CacheResponse { status: StatusCode::OK, headers, body: Some(Bytes::from(body.to_string())) }
    }

    #[tokio::test]
    async fn miss_then_hit_reports_age() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let executor = Executor::new(storage, Config::default());
        let backend = FakeBackend::new(vec![ok_response("Mon, 01 Jan 2024 00:00:00 GMT", "3600", "hi")]);

        let t0 = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let mut cx = ExecutionContext::at(CacheMode::default(), t0);
        let first = executor.execute(get("/a"), &backend, &mut cx).await.unwrap();
        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(cx.cache_status, Some(CacheStatus::Miss));

        let mut cx2 = ExecutionContext::at(CacheMode::default(), t0 + Duration::from_secs(10));
        let second = executor.execute(get("/a"), &backend, &mut cx2).await.unwrap();
        assert_eq!(cx2.cache_status, Some(CacheStatus::Hit));
        assert_eq!(second.headers.get("age"), Some("10"));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn post_invalidates_prior_get() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let executor = Executor::new(storage, Config::default());
        let backend =
            FakeBackend::new(vec![ok_response("Mon, 01 Jan 2024 00:00:00 GMT", "3600", "hi")]);

        let t0 = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let mut cx = ExecutionContext::at(CacheMode::default(), t0);
        executor.execute(get("/a"), &backend, &mut cx).await.unwrap();

        let post = CacheRequest {
            method: Method::POST,
            target_host: "example.com".into(),
            request_target: "/a".into(),
            headers: HeaderList::new(),
            body: None,
        };
        let post_backend =
            FakeBackend::new(vec![CacheResponse { status: StatusCode::NO_CONTENT, headers: HeaderList::new(), body: None }]);
        let mut cx_post = ExecutionContext::at(CacheMode::default(), t0);
        executor.execute(post, &post_backend, &mut cx_post).await.unwrap();

        let mut cx3 = ExecutionContext::at(CacheMode::default(), t0 + Duration::from_secs(1));
        executor.execute(get("/a"), &backend, &mut cx3).await.unwrap();
        assert_eq!(cx3.cache_status, Some(CacheStatus::Miss));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn revalidation_304_is_served_as_hit() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let executor = Executor::new(storage, Config::default());

        let t0 = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let mut first_headers = HeaderList::new();
        first_headers.push("date", "Mon, 01 Jan 2024 00:00:00 GMT");
        first_headers.push("cache-control", "max-age=5");
        first_headers.push("etag", "\"abc\"");
        let first_response =
            CacheResponse { status: StatusCode::OK, headers: first_headers, body: Some(Bytes::from_static(b"v1")) };

        let mut revalidated_headers = HeaderList::new();
        revalidated_headers.push("date", "Mon, 01 Jan 2024 00:00:10 GMT");
        let not_modified =
            CacheResponse { status: StatusCode::NOT_MODIFIED, headers: revalidated_headers, body: None };

        let backend = FakeBackend::new(vec![first_response, not_modified]);

        let mut cx = ExecutionContext::at(CacheMode::default(), t0);
        executor.execute(get("/a"), &backend, &mut cx).await.unwrap();
        assert_eq!(cx.cache_status, Some(CacheStatus::Miss));

        let mut cx2 = ExecutionContext::at(CacheMode::default(), t0 + Duration::from_secs(20));
        let response = executor.execute(get("/a"), &backend, &mut cx2).await.unwrap();
        assert_eq!(cx2.cache_status, Some(CacheStatus::Validated));
        assert_eq!(response.body.unwrap(), "v1");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn only_if_cached_miss_synthesizes_gateway_timeout() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let executor = Executor::new(storage, Config::default());
        let backend = FakeBackend::new(vec![ok_response("Mon, 01 Jan 2024 00:00:00 GMT", "3600", "hi")]);

        let mut request = get("/never-cached");
        request.headers.push("cache-control", "only-if-cached");
        let mut cx = ExecutionContext::default();
        let response = executor.execute(request, &backend, &mut cx).await.unwrap();

        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(cx.cache_status, Some(CacheStatus::Failure));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn oversize_response_is_not_stored() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let config = Config { max_object_size_bytes: 1, ..Config::default() };
        let executor = Executor::new(storage, config);
        let backend = FakeBackend::new(vec![ok_response("Mon, 01 Jan 2024 00:00:00 GMT", "3600", "too-big")]);

        let t0 = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let mut cx = ExecutionContext::at(CacheMode::default(), t0);
        executor.execute(get("/big"), &backend, &mut cx).await.unwrap();

        let mut cx2 = ExecutionContext::at(CacheMode::default(), t0 + Duration::from_secs(1));
        executor.execute(get("/big"), &backend, &mut cx2).await.unwrap();
        assert_eq!(cx2.cache_status, Some(CacheStatus::Miss));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn stale_if_error_serves_stale_entry_on_backend_failure() {
        let storage = Arc::new(InMemoryStorage::new(10));
        let executor = Executor::new(storage, Config::default());

        let mut headers = HeaderList::new();
        headers.push("date", "Mon, 01 Jan 2024 00:00:00 GMT");
        headers.push("cache-control", "max-age=5, stale-if-error=600");
        headers.push("etag", "\"abc\"");
        let ok = CacheResponse { status: StatusCode::OK, headers, body: Some(Bytes::from_static(b"v1")) };

        let t0 = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let backend = FakeBackend::new(vec![ok]);
        let mut cx = ExecutionContext::at(CacheMode::default(), t0);
        executor.execute(get("/a"), &backend, &mut cx).await.unwrap();

        struct FailingBackend;
        #[async_trait]
        impl Backend for FailingBackend {
            async fn execute(
                &self,
                _target_host: &str,
                _request: &CacheRequest,
                _cx: &mut ExecutionContext,
            ) -> Result<CacheResponse> {
                Err(CacheError::backend(std::io::Error::other("connection reset")))
            }
        }

        let mut cx2 = ExecutionContext::at(CacheMode::default(), t0 + Duration::from_secs(60));
        let response = executor.execute(get("/a"), &FailingBackend, &mut cx2).await.unwrap();
        assert_eq!(cx2.cache_status, Some(CacheStatus::Hit));
        assert_eq!(response.headers.get("warning").map(|w| w.starts_with("110")), Some(true));
    }
}
