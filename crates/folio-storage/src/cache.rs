//! Directory existence cache.
//!
//! Remote existence checks cost a network round trip (and on rate-limited drive APIs a
//! quota token). The cache remembers what each path looked like the last time it was
//! checked, bounded by a TTL and a fixed capacity with least-recently-used eviction.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use folio_core::StorageSettings;
use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    exists: bool,
    inserted_at: Instant,
}

/// Snapshot of cache occupancy, keyed per backend handle by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

/// How much a read is allowed to rely on cached knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTrust {
    /// Only a cached `true` short-circuits; `false` and misses go to the backend.
    #[default]
    PositiveOnly,
    /// Any unexpired cached answer is returned as-is.
    Trusted,
}

/// TTL + LRU map from path to last-known existence.
///
/// Safe to share between tasks; every operation takes a short internal lock.
pub struct DirectoryExistenceCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
}

impl DirectoryExistenceCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        tracing::debug!(
            ttl_seconds = ttl.as_secs(),
            max_size = capacity.get(),
            "Creating directory existence cache"
        );
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            max_size: capacity.get(),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.cache_ttl_seconds),
            settings.cache_max_entries,
        )
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) > self.ttl
    }

    /// Cached existence for `path`, or `None` on a miss.
    ///
    /// An expired entry is removed and reported as a miss. A hit marks the entry as
    /// most recently used.
    pub fn get(&self, path: &str) -> Option<bool> {
        let mut entries = self.lock();
        let entry = *entries.get(path)?;
        if self.is_expired(&entry, Instant::now()) {
            entries.pop(path);
            tracing::debug!(path = %path, "Directory cache entry expired");
            return None;
        }
        tracing::debug!(path = %path, exists = entry.exists, "Directory cache hit");
        Some(entry.exists)
    }

    /// Cached answer filtered by `trust`.
    pub fn lookup(&self, path: &str, trust: CacheTrust) -> Option<bool> {
        match (self.get(path), trust) {
            (Some(true), _) => Some(true),
            (Some(false), CacheTrust::Trusted) => Some(false),
            _ => None,
        }
    }

    pub fn set(&self, path: &str, exists: bool) {
        let entry = CacheEntry {
            exists,
            inserted_at: Instant::now(),
        };
        let mut entries = self.lock();
        if let Some((evicted, _)) = entries.push(path.to_string(), entry) {
            if evicted != path {
                tracing::debug!(evicted = %evicted, "Evicted least recently used directory cache entry");
            }
        }
    }

    pub fn remove(&self, path: &str) {
        self.lock().pop(path);
    }

    /// Drop every entry, e.g. after out-of-band changes to the remote tree.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        tracing::info!(cleared = count, "Cleared directory existence cache");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get_stats(&self) -> CacheStats {
        let entries = self.lock();
        let now = Instant::now();
        let expired = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: entries.len() - expired,
            expired_entries: expired,
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

impl std::fmt::Debug for DirectoryExistenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryExistenceCache")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .finish()
    }
}
