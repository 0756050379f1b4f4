//! LRU + TTL cache of prepared script modules for the in-process strategies.
//!
//! The map is insertion-ordered: a hit moves the entry to the MRU end, and
//! overflow evicts from the LRU front. Evicted and expired entries get an
//! aggressive teardown that releases their source buffers immediately, since
//! cached user scripts can be large.
use std::time::{Duration, Instant, SystemTime};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::constants::{
    CACHE_SWEEP_MAX_INTERVAL_SECONDS, DEFAULT_CACHE_TTL_SECONDS, DEFAULT_MAX_CACHE_SIZE,
};

/// A script prepared for in-process execution.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Canonical identifier the module was loaded for.
    pub name: String,
    /// Sanitized source text.
    pub source: String,
    /// Parameter names of the entry function.
    pub entry_params: Vec<String>,
    /// Source file modification time at load, used to detect staleness.
    pub modified: Option<SystemTime>,
}

struct CacheEntry {
    module: LoadedModule,
    last_access: Instant,
}

/// Statistics snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of cached modules.
    pub cached_modules: usize,
    /// Configured capacity.
    pub max_cache_size: usize,
    /// Configured time-to-live.
    pub ttl: Duration,
    /// Per-entry `(name, age)` pairs in LRU-to-MRU order.
    pub modules: Vec<(String, Duration)>,
}

/// Bounded module cache keyed by canonical identifier.
pub struct ModuleCache {
    entries: IndexMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    last_sweep: Option<Instant>,
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_CACHE_SIZE,
            Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
        )
    }
}

impl ModuleCache {
    /// Creates a cache bounded to `max_size` entries with the given TTL.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            ttl,
            last_sweep: None,
        }
    }

    /// Looks up a module, refreshing its access time and LRU position.
    pub fn get(&mut self, name: &str) -> Option<&LoadedModule> {
        let index = self.entries.get_index_of(name)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        let entry = &mut self.entries[last];
        entry.last_access = Instant::now();
        Some(&entry.module)
    }

    /// Inserts or replaces a module, evicting the least-recently-used entry
    /// when the cache is full.
    pub fn put(&mut self, module: LoadedModule) {
        let name = module.name.clone();
        if !self.entries.contains_key(&name) && self.entries.len() >= self.max_size {
            if let Some((evicted_name, entry)) = self.entries.shift_remove_index(0) {
                teardown(entry.module);
                debug!("Evicted module from cache: {evicted_name}");
            }
        }

        self.entries.shift_remove(&name);
        self.entries.insert(
            name,
            CacheEntry {
                module,
                last_access: Instant::now(),
            },
        );
    }

    /// Removes entries idle beyond the TTL. Sweeps are rate-limited to once
    /// per `min(300s, ttl)`; off-cadence calls are no-ops. Returns the
    /// number of entries removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let min_interval = Duration::from_secs(
            CACHE_SWEEP_MAX_INTERVAL_SECONDS.min(self.ttl.as_secs().max(1)),
        );
        if let Some(last) = self.last_sweep
            && now.duration_since(last) < min_interval
        {
            return 0;
        }
        self.last_sweep = Some(now);

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_access) > self.ttl)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &stale {
            if let Some(entry) = self.entries.shift_remove(name) {
                teardown(entry.module);
                debug!("Removed stale module from cache: {name}");
            }
        }

        if !stale.is_empty() {
            info!("Cleaned up {} stale module(s) from cache", stale.len());
        }
        stale.len()
    }

    /// Tears down every entry. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain(..) {
            teardown(entry.module);
        }
        info!("Cleared {count} module(s) from cache");
        count
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `name` is cached, without touching its LRU position.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Diagnostics snapshot.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        CacheStats {
            cached_modules: self.entries.len(),
            max_cache_size: self.max_size,
            ttl: self.ttl,
            modules: self
                .entries
                .iter()
                .map(|(name, entry)| {
                    (name.clone(), now.duration_since(entry.last_access))
                })
                .collect(),
        }
    }

    #[cfg(test)]
    fn age_entry(&mut self, name: &str, age: Duration) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.last_access = Instant::now()
                .checked_sub(age)
                .expect("test age within clock range");
        }
    }

    #[cfg(test)]
    fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// Releases a module's buffers before dropping it. Cached sources can hold
/// multi-megabyte scripts, so the memory is returned eagerly rather than
/// waiting for the allocator to reuse the slot.
fn teardown(mut module: LoadedModule) {
    module.source.clear();
    module.source.shrink_to_fit();
    module.entry_params.clear();
    module.entry_params.shrink_to_fit();
    debug!("Tore down cached module: {}", module.name);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> LoadedModule {
        LoadedModule {
            name: name.to_string(),
            source: format!("print('{name}')"),
            entry_params: vec![],
            modified: None,
        }
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let mut cache = ModuleCache::new(3, Duration::from_secs(60));
        for name in ["a", "b", "c"] {
            cache.put(module(name));
        }

        // Touch "a" so "b" becomes the LRU entry.
        assert!(cache.get("a").is_some());
        cache.put(module("d"));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("b"));
        assert_eq!(cache.names(), vec!["c", "a", "d"]);
    }

    #[test]
    fn bound_holds_after_many_inserts() {
        let mut cache = ModuleCache::new(5, Duration::from_secs(60));
        for i in 0..20 {
            cache.put(module(&format!("script{i}")));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.len(), 5);
        // The survivors are exactly the five most recent inserts.
        assert_eq!(
            cache.names(),
            vec!["script15", "script16", "script17", "script18", "script19"]
        );
    }

    #[test]
    fn replacing_an_entry_does_not_evict_others() {
        let mut cache = ModuleCache::new(2, Duration::from_secs(60));
        cache.put(module("a"));
        cache.put(module("b"));
        cache.put(module("a"));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("b"));
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let mut cache = ModuleCache::new(10, Duration::from_secs(30));
        cache.put(module("old"));
        cache.put(module("fresh"));
        cache.age_entry("old", Duration::from_secs(60));

        assert_eq!(cache.sweep(), 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn sweep_is_rate_limited() {
        let mut cache = ModuleCache::new(10, Duration::from_secs(600));
        cache.put(module("a"));
        assert_eq!(cache.sweep(), 0);

        // Entry goes stale immediately afterwards, but the sweep cadence
        // (min(300s, ttl)) suppresses the second pass.
        cache.age_entry("a", Duration::from_secs(900));
        assert_eq!(cache.sweep(), 0);
        assert!(cache.contains("a"));
    }

    #[test]
    fn short_ttl_shortens_the_sweep_cadence() {
        let mut cache = ModuleCache::new(10, Duration::from_secs(1));
        cache.put(module("a"));
        cache.sweep();

        cache.age_entry("a", Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.sweep(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = ModuleCache::new(10, Duration::from_secs(60));
        for name in ["a", "b", "c"] {
            cache.put(module(name));
        }
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_report_entries_in_lru_order() {
        let mut cache = ModuleCache::new(10, Duration::from_secs(60));
        cache.put(module("a"));
        cache.put(module("b"));
        cache.get("a");

        let stats = cache.stats();
        assert_eq!(stats.cached_modules, 2);
        assert_eq!(stats.max_cache_size, 10);
        let names: Vec<&str> = stats.modules.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
