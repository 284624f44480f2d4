//! Bounded LRU cache of raw model output keyed by exact prompt text.
//!
//! Backed by moka with the LRU eviction policy. The wrapper adds hit/miss
//! counters and is not synchronized on its own: it lives inside the
//! [`crate::invoker::ModelHandle`] guard next to the engine it memoizes.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use tracing::trace;

/// Hit/miss counters for a [`PromptCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Fixed-capacity prompt → output map with least-recently-used eviction.
///
/// A capacity of zero disables caching.
pub struct PromptCache {
    capacity: usize,
    cache: Option<Cache<String, String>>,
    hits: u64,
    misses: u64,
}

impl PromptCache {
    pub fn new(capacity: usize) -> Self {
        let cache = (capacity > 0).then(|| {
            Cache::builder()
                .max_capacity(capacity as u64)
                .eviction_policy(EvictionPolicy::lru())
                .build()
        });

        Self {
            capacity,
            cache,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a prompt, marking it as most recently used.
    pub fn get(&mut self, prompt: &str) -> Option<String> {
        let value = self.cache.as_ref().and_then(|c| c.get(prompt));
        match value {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        value
    }

    /// Store output for a prompt, evicting the least recently used entry when
    /// full.
    pub fn insert(&mut self, prompt: String, value: String) {
        let Some(cache) = &self.cache else {
            return;
        };
        trace!(len = prompt.len(), "caching model output");
        cache.insert(prompt, value);
        // Apply buffered reads and evictions now so recency and size stay exact.
        cache.run_pending_tasks();
    }

    /// Drop a prompt's entry. Returns `true` if one was present.
    pub fn invalidate(&mut self, prompt: &str) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let removed = cache.remove(prompt).is_some();
        cache.run_pending_tasks();
        removed
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| {
            c.run_pending_tasks();
            c.entry_count() as usize
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut cache = PromptCache::new(4);
        cache.insert("p".into(), "out".into());
        assert_eq!(cache.get("p").as_deref(), Some("out"));
        assert_eq!(cache.get("q"), None);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = PromptCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn overwrite_does_not_evict() {
        let mut cache = PromptCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.insert("a".into(), "1b".into());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("1b"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = PromptCache::new(3);
        for i in 0..20 {
            cache.insert(format!("prompt {i}"), format!("out {i}"));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("prompt 19").as_deref(), Some("out 19"));
        assert!(cache.get("prompt 0").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let mut cache = PromptCache::new(2);
        cache.insert("a".into(), "1".into());
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = PromptCache::new(0);
        cache.insert("a".into(), "1".into());
        assert!(cache.get("a").is_none());
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.capacity(), 0);
        assert!(cache.is_empty());
    }
}
