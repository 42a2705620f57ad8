//! Cache Entry data model (spec §3, C3).
//!
//! A [`CacheEntry`] is an immutable snapshot written once per successful
//! store. "Update" is expressed exclusively through [`crate::storage::CacheStorage::update`]'s
//! compare-and-swap, never through in-place mutation (spec §9 "Immutability
//! vs in-place mutation").

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::headers::HeaderList;

/// Ordered mapping from variant key to storage key (spec §3 `variant_map`),
/// populated only on a root entry.
pub type VariantMap = Vec<(String, String)>;

/// An immutable snapshot of an origin response plus the metadata needed to
/// compute freshness and serve it again (spec §3).
///
/// Matches the persisted-entry schema of spec §6 field-for-field, with
/// `body_present`/`body_length`/`body_ref` collapsed into a single
/// `Option<Bytes>` — `None` for root/variant-index entries that carry only a
/// [`VariantMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Wall-clock instant the request was issued, milliseconds since epoch.
    pub request_instant: i64,
    /// Wall-clock instant the response was received, milliseconds since
    /// epoch. Must be `>= request_instant` (spec §3); entries that violate
    /// this are treated as unusable by [`Self::is_well_formed`].
    pub response_instant: i64,
    /// The request method that produced this entry. Distinguishes
    /// HEAD-produced entries from GET-produced ones; a HEAD entry must
    /// never satisfy a GET (spec §3).
    pub request_method: String,
    /// The canonical absolute URI used as the storage key for this entry's
    /// root. Stored for diagnostics and for the invalidation do-not-target
    /// comparisons; not itself used to look the entry back up.
    pub request_uri: String,
    /// The filtered request headers (no hop-by-hop, no `Authorization`).
    pub request_headers: HeaderList,
    /// The origin response's status code. Always `>= 200`.
    pub status: u16,
    /// The filtered response headers (no hop-by-hop; `Date` synthesized at
    /// store time if the origin omitted it).
    pub response_headers: HeaderList,
    /// The response body, or `None` for a root/variant-index entry that
    /// holds only [`Self::variants`].
    #[serde(with = "opaque_body")]
    pub body: Option<Bytes>,
    /// Ordered `variant_key -> storage_key` mapping. Non-empty only on a
    /// root entry for a `Vary`-bearing response (spec §3).
    pub variants: VariantMap,
}

impl CacheEntry {
    /// Number of bytes in [`Self::body`], `0` when there is none.
    #[must_use]
    pub fn body_length(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }

    /// `true` for a root entry that routes to variant entries rather than
    /// carrying a body itself.
    #[must_use]
    pub fn is_variant_root(&self) -> bool {
        !self.variants.is_empty()
    }

    /// The parsed `Content-Length` response header, if present and numeric.
    #[must_use]
    pub fn content_length_header(&self) -> Option<u64> {
        self.response_headers.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Partial-response guard (spec §3): a `Content-Length` header that
    /// disagrees with the actual body length marks the entry unsuitable.
    #[must_use]
    pub fn content_length_matches(&self) -> bool {
        match self.content_length_header() {
            Some(declared) => declared == self.body_length(),
            None => true,
        }
    }

    /// `false` when `response_instant < request_instant`, the clock-skew
    /// guard from spec §3 ("If violated on read, entry is treated as
    /// unusable").
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.response_instant >= self.request_instant
    }

    /// `true` if this entry carries a validator usable for conditional
    /// revalidation (`ETag` or `Last-Modified`).
    #[must_use]
    pub fn is_revalidatable(&self) -> bool {
        self.response_headers.contains("etag") || self.response_headers.contains("last-modified")
    }
}

mod opaque_body {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&bytes.as_ref()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let raw: Option<Vec<u8>> = Option::deserialize(d)?;
        Ok(raw.map(Bytes::from))
    }
}
