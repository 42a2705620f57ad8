#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! An RFC 7234 HTTP caching protocol engine.
//!
//! This crate implements the *decision logic* of an HTTP cache — the parts
//! of [RFC 7234](https://www.rfc-editor.org/rfc/rfc7234) that decide whether
//! a stored response may be reused, when it must be revalidated, and what a
//! fresh response is allowed to replace — without opinion on transport,
//! connection management, or wire serialization. Those belong to whatever
//! HTTP client or server framework embeds this engine.
//!
//! The engine is organized as six collaborating components:
//!
//! - [`key`] resolves the canonical storage key for a request and the
//!   variant key for a `Vary`-bearing response.
//! - [`storage`] defines the [`storage::CacheStorage`] contract (with an
//!   in-process [`storage::InMemoryStorage`] reference implementation) that
//!   any persistence layer must satisfy.
//! - [`entry`] defines [`entry::CacheEntry`], the immutable snapshot a
//!   successful store produces.
//! - [`freshness`] computes current age, freshness lifetime and suitability
//!   per RFC 7234 §4.2-§4.3.
//! - [`invalidate`] removes stale entries on unsafe methods and on
//!   same-host `Content-Location`/`Location` responses.
//! - [`executor`] ties the five above into the request-handling state
//!   machine: pass-through, HIT, REVALIDATE, MISS.
//!
//! ## Basic usage
//!
//! ```rust
//! use std::sync::Arc;
//! use http_cache_core::config::ConfigBuilder;
//! use http_cache_core::executor::{CacheMode, ExecutionContext, Executor};
//! use http_cache_core::storage::InMemoryStorage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(InMemoryStorage::new(10_000));
//! let config = ConfigBuilder::new().shared_cache(true).build()?;
//! let executor = Executor::new(storage, config);
//! let _cx = ExecutionContext::new(CacheMode::Default);
//! # Ok(())
//! # }
//! ```
//!
//! ## Cache modes
//!
//! [`executor::CacheMode`] supplements the RFC with deployment-level
//! overrides familiar from browser `fetch()` caching: `Default` follows the
//! RFC, `NoStore`/`Reload`/`NoCache` bypass or force revalidation,
//! `ForceCache`/`OnlyIfCached`/`IgnoreRules` serve stored entries regardless
//! of staleness.

pub mod config;
pub mod entry;
pub mod error;
pub mod executor;
pub mod freshness;
pub mod headers;
pub mod invalidate;
pub mod key;
#[cfg(feature = "rate-limiting")]
#[cfg_attr(docsrs, doc(cfg(feature = "rate-limiting")))]
pub mod rate_limiting;
pub mod storage;

pub use config::{Config, ConfigBuilder};
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use executor::{Backend, CacheMode, CacheRequest, CacheResponse, CacheStatus, ExecutionContext, Executor};
pub use headers::HeaderList;
pub use storage::{CacheStorage, InMemoryStorage};
