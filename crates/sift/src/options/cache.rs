//! Process-wide TTL cache of loaded option pages.
//!
//! Entries are keyed by `(filter id, search text, dependency snapshot, page)`.
//! An entry older than the reader's TTL is treated as absent and evicted on
//! that read; nothing sweeps the cache proactively. Invalidation is explicit,
//! per filter id or global.

use super::loader::OptionsPage;
use crate::value::ValueMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default time-to-live of a cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

static GLOBAL_CACHE: Lazy<OptionsCache> = Lazy::new(OptionsCache::new);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filter_id: String,
    pub search: String,
    pub dependencies: String,
    pub page: usize,
}

impl CacheKey {
    pub fn new(filter_id: &str, search: &str, dependencies: &ValueMap, page: usize) -> Self {
        Self {
            filter_id: filter_id.to_string(),
            search: search.trim().to_string(),
            dependencies: snapshot_key(dependencies),
            page,
        }
    }
}

/// Stable textual form of a dependency snapshot.
pub fn snapshot_key(dependencies: &ValueMap) -> String {
    serde_json::to_string(dependencies).unwrap_or_default()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    page: OptionsPage,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Shared option-page cache. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct OptionsCache {
    entries: Arc<Mutex<HashMap<CacheKey, CacheEntry>>>,
}

impl OptionsCache {
    /// A private cache, independent of the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache engines use unless given their own.
    pub fn global() -> Self {
        GLOBAL_CACHE.clone()
    }

    /// Look up a live entry. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &CacheKey, ttl: Duration) -> Option<OptionsPage> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(ttl) => {
                debug!(filter = %key.filter_id, page = key.page, "options cache entry expired");
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.page.clone()),
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, page: OptionsPage) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                page,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every entry of one filter. Returns the number of entries removed.
    pub fn invalidate(&self, filter_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.filter_id != filter_id);
        before - entries.len()
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Invalidate the process-wide cache for one filter, or entirely with `None`.
pub fn invalidate_options_cache(filter_id: Option<&str>) -> usize {
    let cache = OptionsCache::global();
    match filter_id {
        Some(id) => cache.invalidate(id),
        None => cache.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FilterOption;
    use crate::value::FilterValue;

    fn page(values: &[&str]) -> OptionsPage {
        OptionsPage::new(values.iter().map(|v| FilterOption::new(*v, *v)).collect())
    }

    fn key(filter: &str, search: &str, page: usize) -> CacheKey {
        CacheKey::new(filter, search, &ValueMap::new(), page)
    }

    #[test]
    fn search_text_is_trimmed_in_keys() {
        assert_eq!(key("city", "  par ", 1), key("city", "par", 1));
    }

    #[test]
    fn dependency_snapshot_is_part_of_the_key() {
        let mut fr = ValueMap::new();
        fr.insert("country".into(), FilterValue::from("fr"));
        let mut de = ValueMap::new();
        de.insert("country".into(), FilterValue::from("de"));
        assert_ne!(CacheKey::new("city", "", &fr, 1), CacheKey::new("city", "", &de, 1));
    }

    #[test]
    fn hit_and_miss() {
        let cache = OptionsCache::new();
        cache.insert(key("city", "", 1), page(&["paris"]));

        assert_eq!(cache.get(&key("city", "", 1), DEFAULT_CACHE_TTL), Some(page(&["paris"])));
        assert_eq!(cache.get(&key("city", "", 2), DEFAULT_CACHE_TTL), None);
        assert_eq!(cache.get(&key("city", "x", 1), DEFAULT_CACHE_TTL), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_read() {
        let cache = OptionsCache::new();
        cache.insert(key("city", "", 1), page(&["paris"]));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key("city", "", 1), Duration::from_secs(120)).is_some());
        assert_eq!(cache.len(), 1);

        assert!(cache.get(&key("city", "", 1), Duration::from_secs(60)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_is_scoped_to_one_filter() {
        let cache = OptionsCache::new();
        cache.insert(key("city", "", 1), page(&["paris"]));
        cache.insert(key("city", "", 2), page(&["lyon"]));
        cache.insert(key("country", "", 1), page(&["fr"]));

        assert_eq!(cache.invalidate("city"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn clones_share_storage() {
        let cache = OptionsCache::new();
        let other = cache.clone();
        other.insert(key("city", "", 1), page(&["paris"]));
        assert_eq!(cache.len(), 1);
    }
}
