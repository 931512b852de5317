//! Content addressed storage for compiled includes.
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::time::SystemTime;

use rapidhash::fast::RapidHasher;

/// Computes the 64-bit content hash of a template source.
///
/// The hash is not cryptographic.  A collision would serve stale output for
/// a changed include.
pub fn content_hash(source: &str) -> u64 {
    let mut hasher = RapidHasher::default();
    hasher.write(source.as_bytes());
    hasher.finish()
}

/// A single cached include.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    html: String,
    inserted_at: SystemTime,
    hash: u64,
    sequence: u64,
}

impl CacheEntry {
    /// The rendered HTML.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// When the entry was inserted.
    pub fn inserted_at(&self) -> SystemTime {
        self.inserted_at
    }

    /// The content hash of the source the entry was rendered from.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

/// Hit and miss counters of a [`TemplateCache`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Number of entries currently stored.
    pub entries: usize,
    /// Number of successful lookups.
    pub hits: u64,
    /// Number of failed lookups.
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub hit_rate: f64,
}

/// Caches the output of included templates.
///
/// Entries are keyed by the resolved path of the include and validated by
/// the hash of its source.  When the cache is at capacity the entry that was
/// inserted first is evicted.  A capacity of zero means unlimited.
///
/// ```
/// use minipug::{content_hash, TemplateCache};
///
/// let mut cache = TemplateCache::with_max_size(16);
/// let hash = content_hash("p hello");
/// cache.put("partials/hello.pug", "<p>hello</p>".into(), hash);
/// assert_eq!(cache.get_if_valid("partials/hello.pug", hash), Some("<p>hello</p>"));
/// assert_eq!(cache.stats().hits, 1);
/// ```
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: BTreeMap<String, CacheEntry>,
    max_size: usize,
    hits: u64,
    misses: u64,
    next_sequence: u64,
}

impl TemplateCache {
    /// Creates an unbounded cache.
    pub fn new() -> TemplateCache {
        TemplateCache::default()
    }

    /// Creates a cache holding at most `max_size` entries.
    pub fn with_max_size(max_size: usize) -> TemplateCache {
        TemplateCache {
            max_size,
            ..TemplateCache::default()
        }
    }

    /// Returns the capacity, zero means unlimited.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the cache empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// Looks up an entry regardless of its hash.
    pub fn get(&mut self, key: &str) -> Option<&str> {
        let hit = self.entries.contains_key(key);
        self.record(hit);
        self.entries.get(key).map(|entry| entry.html.as_str())
    }

    /// Looks up an entry that was rendered from a source with the given hash.
    pub fn get_if_valid(&mut self, key: &str, hash: u64) -> Option<&str> {
        let hit = self.entries.get(key).map_or(false, |entry| entry.hash == hash);
        self.record(hit);
        if hit {
            self.entries.get(key).map(|entry| entry.html.as_str())
        } else {
            None
        }
    }

    /// Returns an entry without touching the counters.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Stores an entry, evicting the oldest one when at capacity.
    pub fn put<K: Into<String>>(&mut self, key: K, html: String, hash: u64) {
        let key = key.into();
        if self.max_size > 0
            && self.entries.len() >= self.max_size
            && !self.entries.contains_key(&key)
        {
            self.evict_oldest();
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            CacheEntry {
                html,
                inserted_at: SystemTime::now(),
                hash,
                sequence,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.sequence)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            log::debug!("evicting cached include {key}");
            self.entries.remove(&key);
        }
    }

    /// Removes an entry.  Returns `true` if it existed.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes all entries.  The counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the current counters.
    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                self.hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(content_hash("p hello"), content_hash("p hello"));
        assert_ne!(content_hash("p hello"), content_hash("p hello!"));
    }

    #[test]
    fn test_stale_entries_miss() {
        let mut cache = TemplateCache::new();
        cache.put("a", "<a></a>".into(), 1);
        assert_eq!(cache.get_if_valid("a", 2), None);
        assert_eq!(cache.get_if_valid("a", 1), Some("<a></a>"));
        assert_eq!(cache.get("missing"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let mut cache = TemplateCache::with_max_size(2);
        cache.put("a", "1".into(), 1);
        cache.put("b", "2".into(), 2);
        cache.put("a", "3".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.entry("b").map(|x| x.html()), Some("2"));
        assert_eq!(cache.entry("a").map(|x| x.hash()), Some(3));
    }
}
