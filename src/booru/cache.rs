//! Client-side cache for API responses.
//!
//! Search pages are cached in an LRU keyed by (site, tags, page, size)
//! with a short TTL; single-post lookups go into an unbounded concurrent
//! map with a longer TTL. Expired entries are dropped lazily on access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::RwLock;

use crate::booru::adapter::SearchQuery;
use crate::booru::post::SharedPost;

/// Cache entry with expiration time.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for search pages.
    pub search_ttl: Duration,
    /// Time-to-live for single-post lookups.
    pub lookup_ttl: Duration,
    /// Maximum number of cached search pages.
    pub max_search_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(300),
            lookup_ttl: Duration::from_secs(3600),
            max_search_entries: 256,
        }
    }
}

/// Hit/miss counters, exposed for the status line.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub search_hits: AtomicU64,
    pub search_misses: AtomicU64,
    pub lookup_hits: AtomicU64,
    pub lookup_misses: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.search_hits.load(Ordering::Relaxed),
            self.search_misses.load(Ordering::Relaxed),
            self.lookup_hits.load(Ordering::Relaxed),
            self.lookup_misses.load(Ordering::Relaxed),
        )
    }
}

pub struct ResponseCache {
    search_cache: RwLock<LruCache<String, CacheEntry<Vec<SharedPost>>>>,
    /// Composite key -> post. Only successful lookups are cached so a
    /// transient failure stays retryable.
    lookup_cache: DashMap<String, CacheEntry<SharedPost>>,
    config: CacheConfig,
    stats: CacheStats,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = config.max_search_entries.max(1).try_into().expect("non-zero capacity");
        Self {
            search_cache: RwLock::new(LruCache::new(capacity)),
            lookup_cache: DashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    fn search_key(query: &SearchQuery) -> String {
        format!(
            "{}|{}|{}|{}",
            query.site.key(),
            query.tags.trim().to_lowercase(),
            query.page,
            query.page_size
        )
    }

    pub fn get_search(&self, query: &SearchQuery) -> Option<Vec<SharedPost>> {
        let key = Self::search_key(query);
        let mut cache = self.search_cache.write();
        if let Some(entry) = cache.get(&key) {
            if !entry.is_expired() {
                self.stats.search_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            cache.pop(&key);
        }
        self.stats.search_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put_search(&self, query: &SearchQuery, posts: Vec<SharedPost>) {
        let key = Self::search_key(query);
        self.search_cache
            .write()
            .put(key, CacheEntry::new(posts, self.config.search_ttl));
    }

    pub fn get_lookup(&self, composite_key: &str) -> Option<SharedPost> {
        if let Some(entry) = self.lookup_cache.get(composite_key) {
            if !entry.is_expired() {
                self.stats.lookup_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
        }
        self.lookup_cache.remove_if(composite_key, |_, v| v.is_expired());
        self.stats.lookup_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put_lookup(&self, post: SharedPost) {
        self.lookup_cache.insert(
            post.key().to_string(),
            CacheEntry::new(post, self.config.lookup_ttl),
        );
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::post::{Post, PostDetails};
    use crate::booru::site::BooruSite;

    fn sample(id: &str) -> SharedPost {
        Post::new(
            BooruSite::Safebooru,
            id,
            PostDetails {
                preview_url: "https://safebooru.org/t.jpg".into(),
                full_url: "https://safebooru.org/f.jpg".into(),
                ..PostDetails::default()
            },
        )
    }

    #[test]
    fn search_pages_round_trip_until_expiry() {
        let cache = ResponseCache::new(CacheConfig {
            search_ttl: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        let query = SearchQuery::new(BooruSite::Safebooru, "sky", 1, 40);

        assert!(cache.get_search(&query).is_none());
        cache.put_search(&query, vec![sample("1")]);
        let hit = cache.get_search(&query).expect("cached");
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].key(), "safebooru::1");

        let (hits, misses, _, _) = cache.stats().snapshot();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn expired_search_pages_miss() {
        let cache = ResponseCache::new(CacheConfig {
            search_ttl: Duration::from_secs(0),
            ..CacheConfig::default()
        });
        let query = SearchQuery::new(BooruSite::Safebooru, "", 1, 40);
        cache.put_search(&query, vec![sample("1")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_search(&query).is_none());
    }

    #[test]
    fn query_text_is_normalized_into_the_key() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.put_search(
            &SearchQuery::new(BooruSite::Safebooru, " Sky ", 1, 40),
            vec![sample("1")],
        );
        assert!(
            cache
                .get_search(&SearchQuery::new(BooruSite::Safebooru, "sky", 1, 40))
                .is_some()
        );
    }

    #[test]
    fn lookups_cache_by_composite_key() {
        let cache = ResponseCache::new(CacheConfig::default());
        assert!(cache.get_lookup("safebooru::9").is_none());
        cache.put_lookup(sample("9"));
        assert!(cache.get_lookup("safebooru::9").is_some());
    }
}
