//! Ordered header lists and Cache-Control directive parsing.
//!
//! Shared by C1 (key derivation), C3 (entry storage), C4 (freshness) and C5
//! (invalidation). Kept as its own module because all four components need
//! to agree on hop-by-hop filtering and Cache-Control parsing.

use serde::{Deserialize, Serialize};

/// Hop-by-hop header names (spec §9, minimum list). Always stripped when a
/// [`crate::entry::CacheEntry`] is written and when merging a 304 response
/// into a stored entry (spec §4.5.2).
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// An ordered, duplicate-preserving list of header `(name, value)` pairs.
///
/// Matches the persisted-entry schema (spec §6): `[(name:utf8, value:utf8)*]`.
/// Names are normalized to lowercase on insertion; original casing is not
/// retained, matching the spec's "filtered" header contract rather than a
/// wire-accurate representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<(String, String)>);

impl HeaderList {
    /// An empty header list.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a header, preserving any existing values for the same name.
    pub fn push(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0.push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Returns the first value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_ascii_lowercase();
        self.0.iter().filter(move |(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any value for `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes every value for `name`.
    pub fn remove(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.0.retain(|(n, _)| n != &name);
    }

    /// Replaces every value for `name` with a single new value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.push(name, value);
    }

    /// Iterates over every `(name, value)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    /// Number of header entries (counting duplicates).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if there are no headers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy with hop-by-hop headers removed, including any header
    /// named by this message's own `Connection` header (spec §9).
    #[must_use]
    pub fn without_hop_by_hop(&self) -> Self {
        let mut named_by_connection: Vec<String> = Vec::new();
        for v in self.get_all("connection") {
            named_by_connection.extend(
                v.split(',').map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()),
            );
        }
        let keep = |n: &str| {
            !HOP_BY_HOP.contains(&n) && !named_by_connection.iter().any(|e| e == n)
        };
        Self(self.0.iter().filter(|(n, _)| keep(n.as_str())).cloned().collect())
    }

    /// Returns a copy with every value for `name` removed.
    #[must_use]
    pub fn without(&self, name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        Self(self.0.iter().filter(|(n, _)| n != &name).cloned().collect())
    }

    /// Drops any `Warning` header field whose warn-code is in the 1xx range
    /// (spec §4.5.2: "Strip `1xx Warning` headers from the result in any
    /// case").
    #[must_use]
    pub fn without_1xx_warnings(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(n, v)| n != "warning" || !is_1xx_warning(v))
                .cloned()
                .collect(),
        )
    }

    /// Builds a [`HeaderList`] from an `http::HeaderMap`, dropping any value
    /// that is not valid UTF-8.
    #[must_use]
    pub fn from_http(map: &http::HeaderMap) -> Self {
        let mut out = Self::new();
        for (name, value) in map.iter() {
            if let Ok(v) = value.to_str() {
                out.push(name.as_str(), v);
            }
        }
        out
    }
}

impl IntoIterator for HeaderList {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn is_1xx_warning(value: &str) -> bool {
    value.trim_start().split(' ').next().map(|code| code.starts_with('1')).unwrap_or(false)
}

/// Parsed `Cache-Control` directives sent by a client (spec §3).
///
/// Numeric fields are `None` when the directive is absent, matching the
/// spec's "negative = unset" sentinel convention rendered idiomatically as
/// `Option`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCacheControl {
    /// `max-age=N`: the client will not accept a response older than N seconds.
    pub max_age: Option<u64>,
    /// `max-stale[=N]`: the client accepts stale responses up to N seconds
    /// past freshness, or any age when `max_stale_unbounded` is set.
    pub max_stale: Option<u64>,
    /// `max-stale` present with no value: accept staleness of any age.
    pub max_stale_unbounded: bool,
    /// `min-fresh=N`: the client wants a response fresh for at least N more
    /// seconds.
    pub min_fresh: Option<u64>,
    /// `no-cache`: a stored response must not be used without revalidation.
    pub no_cache: bool,
    /// `no-store`: do not store (or read) any part of this exchange.
    pub no_store: bool,
    /// `only-if-cached`: do not contact the backend under any circumstance.
    pub only_if_cached: bool,
    /// `stale-if-error=N`: client permits serving a stale entry for up to N
    /// seconds if revalidation fails.
    pub stale_if_error: Option<u64>,
}

/// Parsed `Cache-Control` directives sent by an origin response (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCacheControl {
    /// `max-age=N`.
    pub max_age: Option<u64>,
    /// `s-maxage=N`, honored only when the cache is shared.
    pub s_maxage: Option<u64>,
    /// `no-cache` present with no field-name list (reuse forbidden
    /// unconditionally without revalidation).
    pub no_cache: bool,
    /// `no-cache="field,field"`: reuse is forbidden only for those fields.
    pub no_cache_fields: Vec<String>,
    /// `no-store`.
    pub no_store: bool,
    /// `private` present with no field-name list.
    pub private: bool,
    /// `private="field,field"`.
    pub private_fields: Vec<String>,
    /// `public`.
    pub public: bool,
    /// `must-revalidate`.
    pub must_revalidate: bool,
    /// `proxy-revalidate`.
    pub proxy_revalidate: bool,
    /// `must-understand`.
    pub must_understand: bool,
    /// `immutable`.
    pub immutable: bool,
    /// `stale-while-revalidate=N`.
    pub stale_while_revalidate: Option<u64>,
    /// `stale-if-error=N`.
    pub stale_if_error: Option<u64>,
}

/// Splits one or more `Cache-Control` header values into `(name, value)`
/// pairs, lowercasing directive names and unquoting quoted-string values.
fn parse_directives<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for header_value in values {
        for part in header_value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut kv = part.splitn(2, '=');
            let name = kv.next().unwrap_or("").trim().to_ascii_lowercase();
            if name.is_empty() {
                continue;
            }
            let value = kv.next().map(|v| v.trim().trim_matches('"').to_string());
            out.push((name, value));
        }
    }
    out
}

fn field_list(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .map(|v| v.split(',').map(|f| f.trim().to_ascii_lowercase()).filter(|f| !f.is_empty()).collect())
        .unwrap_or_default()
}

/// Parses the `Cache-Control` header(s) of a request into a
/// [`RequestCacheControl`].
#[must_use]
pub fn parse_request_cache_control(headers: &HeaderList) -> RequestCacheControl {
    let mut cc = RequestCacheControl::default();
    for (name, value) in parse_directives(headers.get_all("cache-control")) {
        match name.as_str() {
            "max-age" => cc.max_age = value.and_then(|v| v.parse().ok()),
            "max-stale" => match value {
                Some(v) => cc.max_stale = v.parse().ok(),
                None => cc.max_stale_unbounded = true,
            },
            "min-fresh" => cc.min_fresh = value.and_then(|v| v.parse().ok()),
            "no-cache" => cc.no_cache = true,
            "no-store" => cc.no_store = true,
            "only-if-cached" => cc.only_if_cached = true,
            "stale-if-error" => cc.stale_if_error = value.and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    cc
}

/// Parses the `Cache-Control` header(s) of a response into a
/// [`ResponseCacheControl`].
#[must_use]
pub fn parse_response_cache_control(headers: &HeaderList) -> ResponseCacheControl {
    let mut cc = ResponseCacheControl::default();
    for (name, value) in parse_directives(headers.get_all("cache-control")) {
        match name.as_str() {
            "max-age" => cc.max_age = value.and_then(|v| v.parse().ok()),
            "s-maxage" => cc.s_maxage = value.and_then(|v| v.parse().ok()),
            "no-cache" => {
                cc.no_cache_fields = field_list(&value);
                if cc.no_cache_fields.is_empty() {
                    cc.no_cache = true;
                }
            }
            "no-store" => cc.no_store = true,
            "private" => {
                cc.private_fields = field_list(&value);
                if cc.private_fields.is_empty() {
                    cc.private = true;
                }
            }
            "public" => cc.public = true,
            "must-revalidate" => cc.must_revalidate = true,
            "proxy-revalidate" => cc.proxy_revalidate = true,
            "must-understand" => cc.must_understand = true,
            "immutable" => cc.immutable = true,
            "stale-while-revalidate" => {
                cc.stale_while_revalidate = value.and_then(|v| v.parse().ok());
            }
            "stale-if-error" => cc.stale_if_error = value.and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    cc
}
