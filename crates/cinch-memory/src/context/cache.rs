//! Summary caching for the compression engine.
//!
//! Re-summarizing an unchanged chunk (a retried pass, or overlapping
//! material across passes) should not cost another LLM call. Summaries are
//! cached by a SHA-256 digest of the prompt plus the rendered content, in a
//! bounded LRU: once full, the least recently used entry is evicted.

use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};

/// Default number of cached summaries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Stable content key: hex SHA-256 of `prompt` and `content`.
pub fn content_key(prompt: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded LRU of summaries keyed by [`content_key`].
#[derive(Debug)]
pub struct SummaryCache {
    entries: LruCache<String, String>,
    /// Hits counter for diagnostics.
    hits: u64,
    /// Misses counter for diagnostics.
    misses: u64,
}

impl Default for SummaryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl SummaryCache {
    /// Create a cache holding at most `capacity` summaries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a cached summary. Counts a hit or a miss.
    pub fn get(&mut self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(summary) => {
                self.hits += 1;
                Some(summary.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a summary, evicting the least recently used entry when full.
    pub fn put(&mut self, key: String, summary: String) {
        self.entries.put(key, summary);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get cache statistics: `(hits, misses, entries)`.
    pub fn stats(&self) -> (u64, u64, usize) {
        (self.hits, self.misses, self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_prompt_sensitive() {
        assert_eq!(content_key("p", "body"), content_key("p", "body"));
        assert_ne!(content_key("p", "body"), content_key("q", "body"));
        assert_ne!(content_key("ab", "c"), content_key("a", "bc"));
        assert_eq!(content_key("p", "body").len(), 64);
    }

    #[test]
    fn hit_and_miss_counting() {
        let mut cache = SummaryCache::new(4);
        assert!(cache.get("k").is_none());
        cache.put("k".into(), "summary".into());
        assert_eq!(cache.get("k").as_deref(), Some("summary"));
        assert_eq!(cache.stats(), (1, 1, 1));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = SummaryCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        // Touch `a` so `b` becomes least recently used.
        assert!(cache.get("a").is_some());
        cache.put("c".into(), "3".into());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = SummaryCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn clear_keeps_counters() {
        let mut cache = SummaryCache::default();
        cache.put("a".into(), "1".into());
        cache.get("a");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().0, 1);
        assert_eq!(cache.capacity(), DEFAULT_CACHE_CAPACITY);
    }
}
