//! In-memory TTL cache for market data.
//!
//! Entries are stored behind `Arc` and replaced wholesale on refresh, so a
//! reader holds either the old value or the new one, never a mix. Expired
//! entries stay readable through [`DataCache::get_stale`] until evicted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Cached value with its fetch time and freshness deadline.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Keyed market data cache.
pub struct DataCache<K, V> {
    entries: RwLock<HashMap<K, Arc<CacheEntry<V>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
}

impl<K, V> DataCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
        }
    }

    /// Get a non-expired entry.
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        let entry = self
            .entries
            .read()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
            .filter(|entry| entry.is_fresh());

        let counter = if entry.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        entry
    }

    /// Store a value with its own TTL, replacing any previous entry.
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        let entry = Arc::new(CacheEntry::new(value, ttl));
        if let Ok(mut cache) = self.entries.write() {
            cache.insert(key, entry);
        }
    }

    /// Get the last stored value regardless of expiry.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        let value = self
            .entries
            .read()
            .ok()
            .and_then(|cache| cache.get(key).map(|entry| entry.value.clone()));
        if value.is_some() {
            self.stale_reads.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut cache) = self.entries.write() {
            cache.remove(key);
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        match self.entries.write() {
            Ok(mut cache) => {
                let before = cache.len();
                cache.retain(|_, entry| entry.is_fresh());
                before - cache.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = self
            .entries
            .read()
            .map(|c| (c.len(), c.values().filter(|e| !e.is_fresh()).count()))
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Default for DataCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_reads: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_get() {
        let cache: DataCache<String, f64> = DataCache::new();
        cache.put("AAPL".into(), 190.5, Duration::from_secs(60));

        let entry = cache.get(&"AAPL".to_string()).unwrap();
        assert_eq!(entry.value, 190.5);
        assert!(entry.is_fresh());
    }

    #[test]
    fn test_cache_miss() {
        let cache: DataCache<String, f64> = DataCache::new();
        assert!(cache.get(&"AAPL".to_string()).is_none());
        assert!(cache.get_stale(&"AAPL".to_string()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_stale_only() {
        let cache: DataCache<String, f64> = DataCache::new();
        cache.put("AAPL".into(), 190.5, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(cache.get(&"AAPL".to_string()).is_none());
        assert_eq!(cache.get_stale(&"AAPL".to_string()), Some(190.5));

        let stats = cache.stats();
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.stale_reads, 1);

        assert_eq!(cache.clear_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let cache: DataCache<String, Vec<f64>> = DataCache::new();
        cache.put("SPY".into(), vec![1.0, 2.0], Duration::from_secs(60));
        let old = cache.get(&"SPY".to_string()).unwrap();

        cache.put("SPY".into(), vec![3.0], Duration::from_secs(60));
        let new = cache.get(&"SPY".to_string()).unwrap();

        // Readers holding the old entry keep a consistent old value
        assert_eq!(old.value, vec![1.0, 2.0]);
        assert_eq!(new.value, vec![3.0]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let cache: DataCache<String, f64> = DataCache::new();
        cache.put("AAPL".into(), 1.0, Duration::from_secs(60));
        cache.invalidate(&"AAPL".to_string());
        assert!(cache.get_stale(&"AAPL".to_string()).is_none());
    }
}
