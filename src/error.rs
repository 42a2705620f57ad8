//! Error kinds for the cache protocol engine (spec §7).

use thiserror::Error;

/// A `Result` typedef to use with [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache protocol engine.
///
/// Propagation follows spec §7: [`CacheError::StorageIo`] is always
/// absorbed by the executor (treated as a miss on read, logged on write);
/// [`CacheError::BackendIo`] propagates unless recovered by stale-if-error;
/// [`CacheError::Protocol`] surfaces directly; [`CacheError::Cancellation`]
/// is cooperative; [`CacheError::Config`] is only ever raised at
/// construction time.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The storage backend (C2) failed to complete an operation.
    #[error("cache storage error: {0}")]
    StorageIo(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend (the non-caching transport collaborator) failed.
    #[error("backend error: {0}")]
    BackendIo(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A malformed request/response was presented to the engine: an
    /// invalid URI, an unparseable required header, or similar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An in-flight operation was abandoned via a cancellation token.
    #[error("operation cancelled")]
    Cancellation,

    /// The engine was constructed with inconsistent configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Error building or reading an `http` request/response.
    #[error(transparent)]
    Http(#[from] http::Error),

    /// Error converting a header value to a `str`.
    #[error(transparent)]
    HeaderToStr(#[from] http::header::ToStrError),

    /// Error parsing a header value.
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Error parsing a header name.
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Error parsing a URL.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
}

impl CacheError {
    /// Wraps an arbitrary storage-backend error as [`CacheError::StorageIo`].
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageIo(Box::new(err))
    }

    /// Wraps an arbitrary backend-transport error as [`CacheError::BackendIo`].
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::BackendIo(Box::new(err))
    }

    /// Returns `true` if this error came from the storage layer and is
    /// therefore always safe to absorb (spec §4.6, §7).
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageIo(_))
    }

    /// Returns `true` if this error came from the backend transport.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::BackendIo(_))
    }
}
