//! Bounded in-process LRU + TTL cache, keyed by `String`.
//!
//! Grounded in `include/utils/UserCacheVal.h`'s `LocalUserCacheByPhone`
//! (capacity-bounded `std::list` + index map). Recency here is tracked with
//! a monotonic counter rather than an intrusive linked list -- eviction
//! scans for the minimum counter, which is O(capacity) but capacity is
//! fixed at ~1024 entries per spec.md Sec4.7, so this stays cheap at the
//! scale the spec targets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A cache entry is either a positive hit or a "confirmed absent" marker,
/// both bearing an expiration (spec.md Sec3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheTag<T> {
    Positive(T),
    Negative,
}

struct Node<T> {
    tag: CacheTag<T>,
    expires_at: Instant,
    seq: u64,
}

pub struct LruTtlCache<T> {
    capacity: usize,
    entries: Mutex<HashMap<String, Node<T>>>,
    seq: AtomicU64,
}

impl<T: Clone> LruTtlCache<T> {
    pub fn new(capacity: usize) -> Self {
        LruTtlCache {
            capacity,
            entries: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheTag<T>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let hit = match entries.get(key) {
            Some(node) if node.expires_at > now => Some(node.tag.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            entries.remove(key);
            return None;
        }
        if let Some(node) = entries.get_mut(key) {
            node.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn put(&self, key: impl Into<String>, tag: CacheTag<T>, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, node)| node.seq)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            Node {
                tag,
                expires_at: now + ttl,
                seq,
            },
        );
    }

    pub fn erase(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_within_ttl() {
        let cache: LruTtlCache<i32> = LruTtlCache::new(4);
        cache.put("a", CacheTag::Positive(1), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(CacheTag::Positive(1)));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache: LruTtlCache<i32> = LruTtlCache::new(4);
        cache.put("a", CacheTag::Positive(1), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn capacity_overflow_evicts_least_recently_used() {
        let cache: LruTtlCache<i32> = LruTtlCache::new(2);
        cache.put("a", CacheTag::Positive(1), Duration::from_secs(60));
        cache.put("b", CacheTag::Positive(2), Duration::from_secs(60));
        // touch "a" so "b" becomes least-recently-used
        cache.get("a");
        cache.put("c", CacheTag::Positive(3), Duration::from_secs(60));

        assert_eq!(cache.get("a"), Some(CacheTag::Positive(1)));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(CacheTag::Positive(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn erase_removes_entry() {
        let cache: LruTtlCache<i32> = LruTtlCache::new(4);
        cache.put("a", CacheTag::Positive(1), Duration::from_secs(60));
        cache.erase("a");
        assert_eq!(cache.get("a"), None);
    }
}
