//! Freshness & Suitability Evaluator (spec §4.3, C4).
//!
//! Age arithmetic follows RFC 7234 §4.2.3 exactly as spec §4.3 lays it out;
//! every function here takes `now` as an explicit parameter (rather than
//! calling `SystemTime::now()` internally) so suitability decisions are
//! reproducible in tests, the same discipline the teacher crate uses for
//! `CachePolicy::before_request(&parts, SystemTime::now())`.

use std::time::SystemTime;

use http::Method;

use crate::config::Config;
use crate::entry::CacheEntry;
use crate::headers::{parse_response_cache_control, RequestCacheControl, ResponseCacheControl};

/// Sentinel "infinite" apparent age (spec §4.3: "a large sentinel, e.g.
/// 2^31") used when the stored entry has no parseable `Date` header.
pub const INFINITE_AGE: i64 = 1 << 31;

fn parse_http_date_millis(value: Option<&str>) -> Option<i64> {
    let value = value?;
    let time = httpdate::parse_http_date(value).ok()?;
    let millis = time.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_millis();
    i64::try_from(millis).ok()
}

pub(crate) fn system_time_to_millis(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Computes `current_age` in seconds for a stored entry as of `now` (spec
/// §4.3 RFC 7234 §4.2.3 age algorithm).
#[must_use]
pub fn current_age(entry: &CacheEntry, now: SystemTime) -> i64 {
    let date_millis = parse_http_date_millis(entry.response_headers.get("date"));
    let resp = entry.response_instant;
    let req = entry.request_instant;
    let now_millis = system_time_to_millis(now);

    let apparent_age = match date_millis {
        Some(date) => ((resp - date) / 1000).max(0),
        None => INFINITE_AGE,
    };
    let age_header_seconds =
        entry.response_headers.get("age").and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(0);
    let corrected_age_value = age_header_seconds + (resp - req) / 1000;
    let corrected_initial_age = apparent_age.max(corrected_age_value);
    let resident_time = ((now_millis - resp) / 1000).max(0);
    corrected_initial_age + resident_time
}

/// Computes the freshness lifetime in seconds (spec §4.3 steps 1-5) along
/// with whether it was derived heuristically (used to decide whether a
/// `Warning: 113` must be added when served past the heuristic cap).
#[must_use]
pub fn freshness_lifetime(
    status: u16,
    entry: &CacheEntry,
    response_cc: &ResponseCacheControl,
    config: &Config,
) -> (i64, bool) {
    if config.shared_cache {
        if let Some(s_maxage) = response_cc.s_maxage {
            return (clamp_to_max_ttl(s_maxage as i64, config), false);
        }
    }
    if let Some(max_age) = response_cc.max_age {
        return (clamp_to_max_ttl(max_age as i64, config), false);
    }
    if let (Some(expires), Some(date)) = (
        parse_http_date_millis(entry.response_headers.get("expires")),
        parse_http_date_millis(entry.response_headers.get("date")),
    ) {
        let lifetime = ((expires - date) / 1000).max(0);
        return (clamp_to_max_ttl(lifetime, config), false);
    }
    if let (Some(last_modified), Some(date)) = (
        parse_http_date_millis(entry.response_headers.get("last-modified")),
        parse_http_date_millis(entry.response_headers.get("date")),
    ) {
        let raw = ((date - last_modified).max(0) as f64) * config.heuristic_coefficient / 1000.0;
        let lifetime = (raw as i64).clamp(0, config.heuristic_max_lifetime_seconds);
        return (clamp_to_max_ttl(lifetime, config), true);
    }
    if config.heuristic_cacheable_statuses.contains(&status) {
        return (
            clamp_to_max_ttl(config.heuristic_default_lifetime_seconds, config),
            config.heuristic_default_lifetime_seconds > 0,
        );
    }
    (0, false)
}

fn clamp_to_max_ttl(lifetime: i64, config: &Config) -> i64 {
    match config.max_ttl {
        Some(ttl) => lifetime.min(ttl.as_secs() as i64),
        None => lifetime,
    }
}

/// Is-fresh predicate (spec §4.3), adjusted by the request's `max-age` and
/// `min-fresh` directives.
#[must_use]
pub fn is_fresh(current_age: i64, lifetime: i64, request_cc: &RequestCacheControl) -> bool {
    if let Some(max_age) = request_cc.max_age {
        if current_age > max_age as i64 {
            return false;
        }
    }
    let min_fresh = request_cc.min_fresh.unwrap_or(0) as i64;
    current_age + min_fresh < lifetime
}

/// `true` if the request's `max-stale` directive covers the entry's
/// staleness (spec §4.3).
#[must_use]
pub fn max_stale_permits(current_age: i64, lifetime: i64, request_cc: &RequestCacheControl) -> bool {
    if request_cc.max_stale_unbounded {
        return true;
    }
    match request_cc.max_stale {
        Some(max_stale) => current_age - lifetime <= max_stale as i64,
        None => false,
    }
}

/// `true` if the entry is within its `stale-while-revalidate` window (spec
/// §4.3). The core engine treats this identically to a permitted-stale hit;
/// asynchronous background revalidation is a caller/transport concern
/// outside this crate's scope (spec §1 out-of-scope: "the non-caching HTTP
/// client").
#[must_use]
pub fn stale_while_revalidate_permits(
    current_age: i64,
    lifetime: i64,
    response_cc: &ResponseCacheControl,
) -> bool {
    match response_cc.stale_while_revalidate {
        Some(window) => current_age - lifetime <= window as i64,
        None => false,
    }
}

/// `true` if serving the stale entry after a failed revalidation is
/// permitted by either side's `stale-if-error` directive and by
/// [`Config::permit_stale_if_error`] (spec §4.5, §4.6).
#[must_use]
pub fn stale_if_error_permits(
    current_age: i64,
    lifetime: i64,
    request_cc: &RequestCacheControl,
    response_cc: &ResponseCacheControl,
    config: &Config,
) -> bool {
    if !config.permit_stale_if_error {
        return false;
    }
    let window = request_cc.stale_if_error.or(response_cc.stale_if_error);
    match window {
        Some(window) => current_age - lifetime <= window as i64,
        None => false,
    }
}

/// Full suitability check for serving `entry` as a HIT for `request`
/// without contacting the backend (spec §4.3 "Suitability for a given
/// request").
#[must_use]
pub fn is_suitable(
    request_method: &Method,
    entry: &CacheEntry,
    request_cc: &RequestCacheControl,
    response_cc: &ResponseCacheControl,
    now: SystemTime,
    config: &Config,
) -> bool {
    if !method_matches(entry, request_method) {
        return false;
    }
    if !entry.content_length_matches() {
        return false;
    }
    if !entry.is_well_formed() {
        return false;
    }
    if request_cc.no_store {
        return false;
    }
    if request_cc.no_cache && !request_cc.only_if_cached {
        return false;
    }
    if response_cc.no_cache {
        return false;
    }

    let age = current_age(entry, now);
    let (lifetime, _) = freshness_lifetime(entry.status, entry, response_cc, config);
    let fresh = is_fresh(age, lifetime, request_cc);

    if fresh {
        return true;
    }
    if response_cc.must_revalidate {
        return false;
    }
    max_stale_permits(age, lifetime, request_cc) || stale_while_revalidate_permits(age, lifetime, response_cc)
}

pub(crate) fn method_matches(entry: &CacheEntry, request_method: &Method) -> bool {
    match entry.request_method.as_str() {
        "HEAD" => *request_method == Method::HEAD,
        "GET" => *request_method == Method::GET,
        other => request_method.as_str() == other,
    }
}

/// `true` when [`freshness_lifetime`] was derived heuristically and the
/// entry has been served past the heuristic cap, meaning a `Warning: 113`
/// must be attached (spec §4.3 step 4).
#[must_use]
pub fn needs_heuristic_warning(current_age: i64, used_heuristic: bool, lifetime: i64) -> bool {
    used_heuristic && current_age > lifetime
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderList;
    use std::time::Duration;

    fn entry_at(date: &str, max_age_header: Option<&str>, req_resp_offset_ms: i64) -> CacheEntry {
        let mut headers = HeaderList::new();
        headers.push("date", date);
        if let Some(ma) = max_age_header {
            headers.push("cache-control", format!("max-age={ma}"));
        }
        CacheEntry {
            request_instant: 0,
            response_instant: req_resp_offset_ms,
            request_method: "GET".into(),
            request_uri: "https://example.com/a".into(),
            request_headers: HeaderList::new(),
            status: 200,
            response_headers: headers,
            body: Some(bytes::Bytes::from_static(b"hello")),
            variants: Vec::new(),
        }
    }

    #[test]
    fn simple_hit_age_matches_resident_time() {
        let entry = entry_at("Mon, 01 Jan 2024 00:00:00 GMT", Some("3600"), 0);
        let date = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let now = date + Duration::from_secs(10);
        let age = current_age(&entry, now);
        assert!((9..=11).contains(&age), "age was {age}");
    }

    #[test]
    fn max_age_freshness_lifetime() {
        let entry = entry_at("Mon, 01 Jan 2024 00:00:00 GMT", Some("3600"), 0);
        let cc = parse_response_cache_control(&entry.response_headers);
        let config = Config::default();
        let (lifetime, heuristic) = freshness_lifetime(200, &entry, &cc, &config);
        assert_eq!(lifetime, 3600);
        assert!(!heuristic);
    }

    #[test]
    fn shared_cache_prefers_s_maxage_over_max_age() {
        let mut headers = HeaderList::new();
        headers.push("date", "Mon, 01 Jan 2024 00:00:00 GMT");
        headers.push("cache-control", "max-age=60, s-maxage=120");
        let entry = CacheEntry {
            request_instant: 0,
            response_instant: 0,
            request_method: "GET".into(),
            request_uri: "https://example.com/a".into(),
            request_headers: HeaderList::new(),
            status: 200,
            response_headers: headers,
            body: Some(bytes::Bytes::from_static(b"x")),
            variants: Vec::new(),
        };
        let cc = parse_response_cache_control(&entry.response_headers);
        let config = Config { shared_cache: true, ..Config::default() };
        let (lifetime, _) = freshness_lifetime(200, &entry, &cc, &config);
        assert_eq!(lifetime, 120);
    }

    #[test]
    fn heuristic_freshness_from_last_modified_is_clamped() {
        let mut headers = HeaderList::new();
        headers.push("date", "Fri, 01 Nov 2024 00:00:00 GMT");
        headers.push("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT");
        let entry = CacheEntry {
            request_instant: 0,
            response_instant: 0,
            request_method: "GET".into(),
            request_uri: "https://example.com/a".into(),
            request_headers: HeaderList::new(),
            status: 200,
            response_headers: headers,
            body: Some(bytes::Bytes::from_static(b"x")),
            variants: Vec::new(),
        };
        let cc = parse_response_cache_control(&entry.response_headers);
        let config = Config::default();
        let (lifetime, heuristic) = freshness_lifetime(200, &entry, &cc, &config);
        assert!(heuristic);
        assert_eq!(lifetime, config.heuristic_max_lifetime_seconds);
    }

    #[test]
    fn stale_if_error_window_is_respected() {
        let request_cc = RequestCacheControl { stale_if_error: Some(60), ..Default::default() };
        let response_cc = ResponseCacheControl::default();
        let config = Config::default();
        assert!(stale_if_error_permits(130, 100, &request_cc, &response_cc, &config));
        assert!(!stale_if_error_permits(200, 100, &request_cc, &response_cc, &config));
    }

    #[test]
    fn stale_if_error_disabled_by_config_never_permits() {
        let request_cc = RequestCacheControl { stale_if_error: Some(600), ..Default::default() };
        let response_cc = ResponseCacheControl::default();
        let config = Config { permit_stale_if_error: false, ..Config::default() };
        assert!(!stale_if_error_permits(105, 100, &request_cc, &response_cc, &config));
    }

    #[test]
    fn no_store_request_is_never_suitable() {
        let entry = entry_at("Mon, 01 Jan 2024 00:00:00 GMT", Some("3600"), 0);
        let request_cc = RequestCacheControl { no_store: true, ..Default::default() };
        let response_cc = ResponseCacheControl::default();
        let config = Config::default();
        let now = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert!(!is_suitable(&Method::GET, &entry, &request_cc, &response_cc, now, &config));
    }

    #[test]
    fn head_entry_never_satisfies_get() {
        let mut entry = entry_at("Mon, 01 Jan 2024 00:00:00 GMT", Some("3600"), 0);
        entry.request_method = "HEAD".into();
        let request_cc = RequestCacheControl::default();
        let response_cc = ResponseCacheControl::default();
        let config = Config::default();
        let now = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        assert!(!is_suitable(&Method::GET, &entry, &request_cc, &response_cc, now, &config));
        assert!(is_suitable(&Method::HEAD, &entry, &request_cc, &response_cc, now, &config));
    }
}
