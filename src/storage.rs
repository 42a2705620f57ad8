//! Cache Storage contract and reference in-memory implementation (spec
//! §4.2, C2).
//!
//! [`CacheStorage`] is the abstract key→entry contract every backend
//! (in-memory, disk, distributed) must satisfy; [`InMemoryStorage`] is the
//! reference implementation spec §4.2 calls for: "a reference-tracked LRU
//! with a deferred-disposal queue is the canonical implementation." Our
//! entries hold plain [`bytes::Bytes`] bodies rather than an external
//! resource handle (disk file, arena slot, …), so disposal reduces to
//! ordinary `Drop` of the evicted [`crate::entry::CacheEntry`] — there is no
//! separate resource to reclaim, and no pending-dispose queue is needed. A
//! storage backend that fronts an actual external resource (e.g. a memory-
//! mapped file) would reintroduce that queue at the point it drops an
//! evicted entry's handle.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};

/// A closure passed to [`CacheStorage::update`]: given the current entry at
/// a key (or `None` if absent), returns the entry that should be published,
/// or `None` to leave the key's current value unchanged (spec §4.5.2's
/// date-inversion no-op case).
pub type UpdateFn = Box<dyn FnOnce(Option<&CacheEntry>) -> Option<CacheEntry> + Send>;

/// Key→entry mapping with atomic compare-and-swap update (spec §4.2).
///
/// Implementations must be safe for concurrent use by multiple executors
/// (spec §5) and linearizable per-key: a reader of a given key observes one
/// of {no entry, the previous entry, the new entry}, never a torn entry.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Replaces any existing entry at `key`.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Returns the current entry at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Deletes the mapping at `key`. A no-op if nothing is stored there.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Atomic read-modify-write: reads the current entry (if any), applies
    /// `f`, and publishes the result. Returns the value now current at
    /// `key` (either the freshly published entry, or the unchanged prior
    /// value if `f` returned `None`).
    async fn update(&self, key: &str, f: UpdateFn) -> Result<Option<CacheEntry>>;

    /// Batch read. May be non-atomic across keys (spec §4.2).
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, CacheEntry>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.get(key).await? {
                out.insert(key.clone(), entry);
            }
        }
        Ok(out)
    }
}

/// An in-process, reference-tracked LRU implementation of [`CacheStorage`].
///
/// A single [`Mutex`] serializes every operation, which trivially satisfies
/// the linearizability requirement at the cost of no cross-key concurrency —
/// an acceptable tradeoff for a reference implementation whose job is
/// correctness, not throughput (spec §9: "the canonical implementation").
pub struct InMemoryStorage {
    inner: Mutex<LruCache<String, Slot>>,
    generation: AtomicU64,
}

struct Slot {
    entry: CacheEntry,
    /// Monotonically increasing publish order, used only for diagnostics;
    /// the `Mutex` itself is what provides linearizability.
    #[allow(dead_code)]
    generation: u64,
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage").finish_non_exhaustive()
    }
}

impl InMemoryStorage {
    /// Creates a storage instance bounded to `max_entries` (spec §6
    /// `max_cache_entries`). Entries beyond the bound are evicted
    /// least-recently-used first.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is `0`; validate with
    /// [`crate::config::Config`] before constructing storage from
    /// caller-supplied configuration.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).expect("max_entries must be non-zero");
        Self { inner: Mutex::new(LruCache::new(capacity)), generation: AtomicU64::new(0) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Slot>>> {
        self.inner.lock().map_err(|_| CacheError::storage(PoisonedLock))
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStorage for InMemoryStorage {
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let generation = self.next_generation();
        let mut guard = self.lock()?;
        guard.put(key.to_string(), Slot { entry, generation });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut guard = self.lock()?;
        Ok(guard.get(key).map(|slot| slot.entry.clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.lock()?;
        guard.pop(key);
        Ok(())
    }

    async fn update(&self, key: &str, f: UpdateFn) -> Result<Option<CacheEntry>> {
        let generation = self.next_generation();
        let mut guard = self.lock()?;
        let current = guard.get(key).map(|slot| slot.entry.clone());
        match f(current.as_ref()) {
            Some(new_entry) => {
                guard.put(key.to_string(), Slot { entry: new_entry.clone(), generation });
                Ok(Some(new_entry))
            }
            None => Ok(current),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("in-memory storage mutex poisoned")]
struct PoisonedLock;
