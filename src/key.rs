//! Cache Key Resolver (spec §4.1, C1).
//!
//! Derives the canonical storage key for a request and the variant key for
//! a `Vary`-bearing response. Both derivations are load-bearing: invalidation
//! (C5) and variant routing (C6) depend on producing byte-identical keys for
//! byte-identical inputs.

use crate::error::{CacheError, Result};
use crate::headers::HeaderList;

/// Produces the canonical absolute-URI storage key for a request.
///
/// `target_host` is the request's target host, optionally already carrying a
/// scheme (`"https://example.com"`); when no scheme is present the host is
/// classified the same way a reverse proxy would classify its own inbound
/// connection (`localhost`/loopback hosts are treated as `http`, everything
/// else as `https`). `request_target` is either an absolute URI (origin
/// already embeds a scheme) or an origin-form request-target (`/path?query`)
/// resolved against `target_host`.
///
/// Per spec §4.1: scheme and host are lowercased, default ports (80 for
/// `http`, 443 for `https`) are omitted, the fragment is dropped, and the
/// query string is preserved byte-for-byte.
pub fn canonical_uri(target_host: &str, request_target: &str) -> Result<url::Url> {
    let mut url = if looks_absolute(request_target) {
        url::Url::parse(request_target)
            .map_err(|e| CacheError::Protocol(format!("invalid absolute request-target: {e}")))?
    } else {
        let base = base_url(target_host)?;
        base.join(request_target)
            .map_err(|e| CacheError::Protocol(format!("invalid request-target: {e}")))?
    };
    normalize(&mut url);
    Ok(url)
}

/// Convenience wrapper returning the canonical URI's ASCII serialization,
/// which is the *storage key* (spec §4.1).
pub fn canonical_key(target_host: &str, request_target: &str) -> Result<String> {
    Ok(canonical_uri(target_host, request_target)?.into())
}

fn looks_absolute(request_target: &str) -> bool {
    request_target.contains("://")
}

/// Builds a base `http(s)://host/` URL from a target host that may or may
/// not already carry a scheme, mirroring how a caching intermediary
/// classifies its own inbound connection when none is stated explicitly.
fn base_url(target_host: &str) -> Result<url::Url> {
    if target_host.contains("://") {
        return url::Url::parse(target_host)
            .map_err(|e| CacheError::Protocol(format!("invalid target host: {e}")));
    }
    let host_only = target_host.split('/').next().unwrap_or(target_host);
    let scheme = if host_only.starts_with("localhost") || host_only.starts_with("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    url::Url::parse(&format!("{scheme}://{target_host}/"))
        .map_err(|e| CacheError::Protocol(format!("invalid target host: {e}")))
}

fn normalize(url: &mut url::Url) {
    url.set_fragment(None);
    if let Some(port) = url.port() {
        if Some(port) == default_port(url.scheme()) {
            let _ = url.set_port(None);
        }
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Builds the composite storage key for a variant entry (spec §3: "The
/// body-bearing entries live at composite keys `{base_key}#{variant_key}`").
#[must_use]
pub fn variant_storage_key(base_key: &str, variant_key: &str) -> String {
    format!("{base_key}#{variant_key}")
}

/// Derives the variant key from a response's `Vary` header value and the
/// current request's headers (spec §4.1).
///
/// Returns `None` for a `Vary: *` response (uncacheable, spec §4.1 "Special
/// rule") and for a response without an effective `Vary` header.
#[must_use]
pub fn variant_key(vary_header: &str, request_headers: &HeaderList) -> Option<String> {
    let mut names: Vec<String> = vary_header
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if names.is_empty() {
        return None;
    }
    if names.iter().any(|n| n == "*") {
        return None;
    }
    names.sort();
    names.dedup();

    let mut buf = String::new();
    for name in &names {
        if !buf.is_empty() {
            buf.push(';');
        }
        let values: Vec<&str> = request_headers.get_all(name).collect();
        buf.push_str(name);
        buf.push('=');
        buf.push_str(&values.join(", "));
    }

    let digest = blake3::hash(buf.as_bytes());
    Some(hex::encode(digest.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_and_drops_default_port() {
        let key = canonical_key("EXAMPLE.com:443", "https://EXAMPLE.com:443/a/b?x=1").unwrap();
        assert_eq!(key, "https://example.com/a/b?x=1");
    }

    #[test]
    fn drops_fragment_but_keeps_query_byte_for_byte() {
        let key = canonical_key("example.com", "/a?Foo=Bar&baz#frag").unwrap();
        assert_eq!(key, "https://example.com/a?Foo=Bar&baz");
    }

    #[test]
    fn localhost_defaults_to_http() {
        let key = canonical_key("localhost:8080", "/health").unwrap();
        assert_eq!(key, "http://localhost:8080/health");
    }

    #[test]
    fn non_default_port_is_retained() {
        let key = canonical_key("example.com:8443", "/a").unwrap();
        assert_eq!(key, "https://example.com:8443/a");
    }

    #[test]
    fn variant_key_is_deterministic_and_order_independent_of_header_list() {
        let mut headers_a = HeaderList::new();
        headers_a.push("Accept-Encoding", "gzip");
        headers_a.push("Accept-Language", "en");

        let mut headers_b = HeaderList::new();
        headers_b.push("accept-language", "en");
        headers_b.push("accept-encoding", "gzip");

        let a = variant_key("Accept-Encoding, Accept-Language", &headers_a).unwrap();
        let b = variant_key("accept-language,accept-encoding", &headers_b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn variant_key_changes_with_header_value() {
        let mut gzip = HeaderList::new();
        gzip.push("Accept-Encoding", "gzip");
        let mut identity = HeaderList::new();
        identity.push("Accept-Encoding", "identity");

        let a = variant_key("Accept-Encoding", &gzip).unwrap();
        let b = variant_key("Accept-Encoding", &identity).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn vary_star_yields_no_variant_key() {
        let headers = HeaderList::new();
        assert!(variant_key("*", &headers).is_none());
        assert!(variant_key("accept, *", &headers).is_none());
    }

    #[test]
    fn absent_vary_header_yields_no_variant_key() {
        let headers = HeaderList::new();
        assert!(variant_key("", &headers).is_none());
    }
}
