//! Invalidator (spec §4.4, C5).
//!
//! Triggered on unsafe methods and on GET/HEAD responses carrying
//! `Content-Location`/`Location`. Removing a root entry removes its variant
//! entries first (spec §4.4: "When removing a root entry, remove each of
//! its variant entries first").

use http::Method;

use crate::executor::{CacheRequest, CacheResponse};
use crate::key;
use crate::storage::CacheStorage;

/// `true` for the methods spec §4.4 calls unsafe.
#[must_use]
pub fn is_unsafe_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE | Method::PATCH)
}

/// Removes the entry at `key` and, if it is a variant root, every variant
/// entry it names, absorbing storage errors per spec §4.6 (logged, never
/// fatal to the caller).
pub async fn remove_with_variants(storage: &dyn CacheStorage, key: &str) {
    match storage.get(key).await {
        Ok(Some(root)) => {
            for (_, variant_storage_key) in &root.variants {
                if let Err(e) = storage.remove(variant_storage_key).await {
                    log::warn!("failed to remove variant entry {variant_storage_key}: {e}");
                }
            }
        }
        Ok(None) => {}
        Err(e) => log::warn!("failed to read entry {key} during invalidation: {e}"),
    }
    if let Err(e) = storage.remove(key).await {
        log::warn!("failed to remove entry {key} during invalidation: {e}");
    }
}

/// Applies spec §4.4 invalidation for a single exchange: removes the
/// request URI's entry when the method is unsafe, and removes the
/// `Content-Location`/`Location` targets when they resolve to the same
/// host, unless the do-not-invalidate exception applies.
pub async fn invalidate_response(
    storage: &dyn CacheStorage,
    target_host: &str,
    request: &CacheRequest,
    response: &CacheResponse,
) {
    if !(200..300).contains(&response.status.as_u16()) {
        return;
    }

    if is_unsafe_method(&request.method) {
        match key::canonical_key(target_host, &request.request_target) {
            Ok(request_key) => remove_with_variants(storage, &request_key).await,
            Err(e) => log::warn!("failed to compute invalidation key: {e}"),
        }
    }

    for header_name in ["content-location", "location"] {
        let Some(location) = response.headers.get(header_name) else { continue };
        let Some(target_key) = same_host_key(target_host, location) else { continue };
        if should_skip_due_to_staleness(storage, &target_key, response).await {
            continue;
        }
        remove_with_variants(storage, &target_key).await;
    }
}

/// Resolves `location` against `target_host` and returns its canonical
/// storage key only if it names the same host (spec §4.4, §9: "restricted
/// to same-host to avoid cache poisoning").
fn same_host_key(target_host: &str, location: &str) -> Option<String> {
    let canonical = key::canonical_uri(target_host, location).ok()?;
    let base = key::canonical_uri(target_host, "/").ok()?;
    if canonical.host_str() == base.host_str() && canonical.scheme() == base.scheme() {
        Some(canonical.into())
    } else {
        None
    }
}

/// Do-not-invalidate exception (spec §4.4): skip invalidation when the
/// response's `Date` is older than the stored entry's, meaning the origin
/// served a stale copy that must not clobber a fresher cached one.
async fn should_skip_due_to_staleness(
    storage: &dyn CacheStorage,
    target_key: &str,
    response: &CacheResponse,
) -> bool {
    let Ok(Some(stored)) = storage.get(target_key).await else { return false };
    let (Some(response_date), Some(stored_date)) = (
        response.headers.get("date").and_then(|v| httpdate::parse_http_date(v).ok()),
        stored.response_headers.get("date").and_then(|v| httpdate::parse_http_date(v).ok()),
    ) else {
        return false;
    };
    response_date < stored_date
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::CacheEntry;
    use crate::executor::CacheResponse;
    use crate::headers::HeaderList;
    use crate::storage::InMemoryStorage;
    use http::StatusCode;

    fn entry(uri: &str, date: &str, variants: Vec<(String, String)>) -> CacheEntry {
        let mut headers = HeaderList::new();
        headers.push("date", date);
        CacheEntry {
            request_instant: 0,
            response_instant: 0,
            request_method: "GET".into(),
            request_uri: uri.into(),
            request_headers: HeaderList::new(),
            status: 200,
            response_headers: headers,
            body: Some(bytes::Bytes::from_static(b"x")),
            variants,
        }
    }

    #[tokio::test]
    async fn removing_root_removes_variants_first() {
        let storage = InMemoryStorage::new(10);
        storage
            .put(
                "https://example.com/a",
                entry(
                    "https://example.com/a",
                    "Mon, 01 Jan 2024 00:00:00 GMT",
                    vec![("v1".into(), "https://example.com/a#v1".into())],
                ),
            )
            .await
            .unwrap();
        storage
            .put(
                "https://example.com/a#v1",
                entry("https://example.com/a", "Mon, 01 Jan 2024 00:00:00 GMT", vec![]),
            )
            .await
            .unwrap();

        remove_with_variants(&storage, "https://example.com/a").await;

        assert!(storage.get("https://example.com/a").await.unwrap().is_none());
        assert!(storage.get("https://example.com/a#v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn post_invalidates_request_uri() {
        let storage = InMemoryStorage::new(10);
        storage
            .put(
                "https://example.com/x",
                entry("https://example.com/x", "Mon, 01 Jan 2024 00:00:00 GMT", vec![]),
            )
            .await
            .unwrap();

        let request = CacheRequest {
            method: Method::POST,
            target_host: "example.com".into(),
            request_target: "/x".into(),
            headers: HeaderList::new(),
            body: None,
        };
        let response = CacheResponse {
            status: StatusCode::NO_CONTENT,
            headers: HeaderList::new(),
            body: None,
        };

        invalidate_response(&storage, "example.com", &request, &response).await;
        assert!(storage.get("https://example.com/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn older_date_on_invalidation_target_is_skipped() {
        let storage = InMemoryStorage::new(10);
        storage
            .put(
                "https://example.com/y",
                entry("https://example.com/y", "Mon, 08 Jan 2024 00:00:00 GMT", vec![]),
            )
            .await
            .unwrap();

        let request = CacheRequest {
            method: Method::POST,
            target_host: "example.com".into(),
            request_target: "/create".into(),
            headers: HeaderList::new(),
            body: None,
        };
        let mut response_headers = HeaderList::new();
        response_headers.push("location", "https://example.com/y");
        response_headers.push("date", "Mon, 01 Jan 2024 00:00:00 GMT");
        let response =
            CacheResponse { status: StatusCode::CREATED, headers: response_headers, body: None };

        invalidate_response(&storage, "example.com", &request, &response).await;
        assert!(storage.get("https://example.com/y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cross_host_location_is_not_invalidated() {
        let storage = InMemoryStorage::new(10);
        storage
            .put(
                "https://other.example/z",
                entry("https://other.example/z", "Mon, 01 Jan 2024 00:00:00 GMT", vec![]),
            )
            .await
            .unwrap();

        let request = CacheRequest {
            method: Method::POST,
            target_host: "example.com".into(),
            request_target: "/create".into(),
            headers: HeaderList::new(),
            body: None,
        };
        let mut response_headers = HeaderList::new();
        response_headers.push("location", "https://other.example/z");
        let response =
            CacheResponse { status: StatusCode::CREATED, headers: response_headers, body: None };

        invalidate_response(&storage, "example.com", &request, &response).await;
        assert!(storage.get("https://other.example/z").await.unwrap().is_some());
    }
}
