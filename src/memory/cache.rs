//! Time-boxed memory cache for ephemeral state.
//!
//! Uses DashMap so reads and writes on one key are serialized without a
//! global lock. Expired entries are swept opportunistically on every write;
//! there is no background timer.

use std::borrow::Borrow;
use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::telemetry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache entry not found")]
    NotFound,
}

/// Per-entry behaviour supplied to [`MemoryCache::set_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheEntryOptions {
    /// Entry becomes eligible for eviction once this much time passes
    /// without a reset. `None` falls back to the cache's default timeout,
    /// or never expires when the cache has none.
    pub timeout: Option<Duration>,
    /// Restart the expiry clock on every successful read.
    pub access_resets_timer: bool,
    /// Keep the entry forever even when the cache has a default timeout.
    pub never_expires: bool,
}

impl CacheEntryOptions {
    pub fn expiring(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            access_resets_timer: false,
            never_expires: false,
        }
    }

    pub fn sliding(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            access_resets_timer: true,
            never_expires: false,
        }
    }

    pub fn never_expiring() -> Self {
        Self {
            timeout: None,
            access_resets_timer: false,
            never_expires: true,
        }
    }

    fn resolve_timeout(&self, default_timeout: Option<Duration>) -> Option<Duration> {
        if self.never_expires {
            None
        } else {
            self.timeout.or(default_timeout)
        }
    }
}

struct CacheEntry<V> {
    value: V,
    /// Creation time, or the last qualifying access when the timer resets.
    cache_time: Instant,
    timeout: Option<Duration>,
    access_resets_timer: bool,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.timeout {
            Some(timeout) => now.saturating_duration_since(self.cache_time) >= timeout,
            None => false,
        }
    }
}

/// Key/value store with per-entry expiry and optional access renewal.
///
/// Keys and values are opaque; values are handed out by clone.
pub struct MemoryCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    default_timeout: Option<Duration>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            default_timeout: None,
        }
    }

    /// Cache whose entries fall back to `timeout` when their options leave it
    /// unset. Use [`CacheEntryOptions::never_expiring`] to opt an entry out.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_timeout: Some(timeout),
        }
    }

    /// Insert or overwrite the entry for `key`, sweeping expired entries first.
    pub fn set_data(&self, key: K, value: V, options: CacheEntryOptions) {
        self.clean_cache();

        let entry = CacheEntry {
            value,
            cache_time: Instant::now(),
            timeout: options.resolve_timeout(self.default_timeout),
            access_resets_timer: options.access_resets_timer,
        };
        self.entries.insert(key, entry);
    }

    /// Current value for `key`.
    ///
    /// An entry found expired is removed here rather than waiting for the
    /// next sweep. Entries with `access_resets_timer` are renewed.
    pub fn get_data<Q>(&self, key: &Q) -> Result<V, CacheError>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let value = {
            let mut entry = self.entries.get_mut(key).ok_or(CacheError::NotFound)?;
            if entry.is_expired(now) {
                None
            } else {
                if entry.access_resets_timer {
                    entry.cache_time = now;
                }
                Some(entry.value.clone())
            }
        };

        match value {
            Some(value) => Ok(value),
            None => {
                // Re-check under the removal lock; a concurrent set_data may
                // have replaced the entry since the guard was dropped.
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Err(CacheError::NotFound)
            }
        }
    }

    /// Remove every entry whose timeout has elapsed. Returns the eviction count.
    pub fn clean_cache(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::trace!(evicted, "memory cache sweep");
            telemetry::record_cache_evictions(evicted);
        }
        evicted
    }

    /// Remove `key` regardless of expiry.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Whether a live (unexpired) entry exists. Does not renew the timer.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
