//! # Translation Cache
//!
//! Bounded memoization of `(source language, target language, text)` to a
//! translation. Eviction is strict FIFO: when full, the entry inserted first is
//! dropped, no matter how often it was read. Entries never expire by time.
//!
//! The cache is only an optimization. A miss costs a provider call; it never
//! changes what gets delivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Composite cache key. Text is stored in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_language: String,
    pub target_language: String,
    pub text: String,
}

impl CacheKey {
    pub fn new(text: &str, source_language: &str, target_language: &str) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            text: normalize_text(text),
        }
    }
}

/// Counters surfaced on the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, String>,
    /// Keys in insertion order; front is the next eviction victim
    order: VecDeque<CacheKey>,
}

/// Thread-safe FIFO translation cache.
#[derive(Debug)]
pub struct TranslationCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TranslationCache {
    /// Create a cache holding at most `capacity` entries. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a translation. Reading never affects eviction order.
    pub fn get(&self, text: &str, source_language: &str, target_language: &str) -> Option<String> {
        let key = CacheKey::new(text, source_language, target_language);
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.entries.get(&key) {
            Some(translation) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(translation.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a translation, evicting the oldest-inserted entry when full.
    ///
    /// Re-inserting an existing key replaces the translation but keeps its
    /// original position in the eviction queue.
    pub fn put(&self, text: &str, source_language: &str, target_language: &str, translation: String) {
        if self.capacity == 0 {
            return;
        }

        let key = CacheKey::new(text, source_language, target_language);
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = inner.entries.get_mut(&key) {
            *existing = translation;
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, translation);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).entries.len()
    }

    #[cfg(test)]
    pub fn contains(&self, text: &str, source_language: &str, target_language: &str) -> bool {
        let key = CacheKey::new(text, source_language, target_language);
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entries
            .contains_key(&key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Trim and collapse whitespace runs so trivially different inputs share an entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = TranslationCache::new(10);
        assert_eq!(cache.get("Hello", "English", "Spanish"), None);

        cache.put("Hello", "English", "Spanish", "Hola".to_string());
        assert_eq!(cache.get("Hello", "English", "Spanish"), Some("Hola".to_string()));

        // Direction matters
        assert_eq!(cache.get("Hello", "Spanish", "English"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_evicts_first_inserted_when_full() {
        let cache = TranslationCache::new(3);
        cache.put("one", "en", "es", "uno".into());
        cache.put("two", "en", "es", "dos".into());
        cache.put("three", "en", "es", "tres".into());
        cache.put("four", "en", "es", "cuatro".into());

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("one", "en", "es"));
        assert!(cache.contains("two", "en", "es"));
        assert!(cache.contains("four", "en", "es"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reads_do_not_change_eviction_order() {
        let cache = TranslationCache::new(2);
        cache.put("one", "en", "es", "uno".into());
        cache.put("two", "en", "es", "dos".into());

        // An LRU would now keep "one"; FIFO must still evict it
        for _ in 0..5 {
            assert!(cache.get("one", "en", "es").is_some());
        }
        cache.put("three", "en", "es", "tres".into());

        assert!(!cache.contains("one", "en", "es"));
        assert!(cache.contains("two", "en", "es"));
        assert!(cache.contains("three", "en", "es"));
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let cache = TranslationCache::new(2);
        cache.put("one", "en", "es", "uno".into());
        cache.put("two", "en", "es", "dos".into());
        cache.put("one", "en", "es", "UNO".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);

        cache.put("three", "en", "es", "tres".into());
        assert!(!cache.contains("one", "en", "es"));
    }

    #[test]
    fn test_whitespace_normalization() {
        let cache = TranslationCache::new(4);
        cache.put("  Hello   world ", "en", "fr", "Bonjour le monde".into());
        assert_eq!(cache.get("Hello world", "en", "fr").as_deref(), Some("Bonjour le monde"));
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = TranslationCache::new(0);
        cache.put("Hello", "en", "es", "Hola".into());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get("Hello", "en", "es"), None);
    }
}
