//! Bounded metadata cache
//!
//! Five independent stores, each behind its own lock:
//!
//! | store      | key            | value                      |
//! |------------|----------------|----------------------------|
//! | `entries`  | path           | root -> path entries       |
//! | `inverted` | root           | path -> path entries       |
//! | `roots`    | root file name | rendered `.root` contents  |
//! | `nodes`    | node file name | node file bytes            |
//! | `data`     | data file name | data file bytes            |
//!
//! A store that is full when a new key arrives is cleared whole before
//! the insert. Overwriting a key already present never clears. Lookups
//! never fail: a miss is an empty value.

use super::types::{PathEntry, RootEntries};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use zipfs_common::{CacheConfig, Result};

/// Counters for one store
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    clears: AtomicU64,
}

impl Counters {
    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.clears.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of one store's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    /// Full-store clears triggered by capacity
    pub clears: u64,
    pub len: usize,
}

impl StoreStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot of every store
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: StoreStats,
    pub inverted: StoreStats,
    pub roots: StoreStats,
    pub nodes: StoreStats,
    pub data: StoreStats,
}

/// One capacity-bounded map
struct Store<K, V> {
    name: &'static str,
    capacity: usize,
    map: Mutex<HashMap<K, V>>,
    counters: Counters,
}

impl<K: Eq + Hash, V> Store<K, V> {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            map: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Clear `map` if `key` is new and there is no room for it
    fn make_room(&self, map: &mut HashMap<K, V>, key: &K) {
        if map.len() >= self.capacity && !map.contains_key(key) {
            let dropped = map.len();
            map.clear();
            self.counters.clears.fetch_add(1, Ordering::Relaxed);
            info!(
                "Metadata cache store '{}' reached capacity {}, cleared {} entries",
                self.name, self.capacity, dropped
            );
        }
    }

    fn insert(&self, key: K, value: V) {
        let mut map = self.map.lock();
        self.make_room(&mut map, &key);
        map.insert(key, value);
    }

    /// Edit the value under `key` in place, creating it if absent
    fn upsert(&self, key: K, edit: impl FnOnce(&mut V))
    where
        V: Default,
    {
        let mut map = self.map.lock();
        self.make_room(&mut map, &key);
        edit(map.entry(key).or_default());
    }

    /// Project the value under `key` through `f`, counting a hit when
    /// both the key and the projection are present
    fn view<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> Option<R>) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let map = self.map.lock();
        let found = map.get(key).and_then(f);
        self.counters.record(found.is_some());
        found
    }

    /// Membership test on the value under `key`, without touching counters
    fn probe<Q>(&self, key: &Q, f: impl FnOnce(&V) -> bool) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.lock().get(key).is_some_and(f)
    }

    fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.probe(key, |_| true)
    }

    fn len(&self) -> usize {
        self.map.lock().len()
    }

    fn reset(&self) {
        self.map.lock().clear();
        self.counters.reset();
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}

/// Cache of path entries and pre-rendered root, node, and data files
///
/// All methods take `&self`; stores are locked independently, so a
/// flusher filling node contents does not contend with path lookups.
pub struct MetadataCache {
    capacity: usize,
    /// path -> root -> entries
    entries: Store<String, HashMap<String, Vec<PathEntry>>>,
    inverted: Store<String, RootEntries>,
    roots: Store<String, String>,
    nodes: Store<String, Bytes>,
    data: Store<String, Bytes>,
}

impl MetadataCache {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_capacity(config.capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Store::new("entries", capacity),
            inverted: Store::new("inverted", capacity),
            roots: Store::new("roots", capacity),
            nodes: Store::new("nodes", capacity),
            data: Store::new("data", capacity),
        }
    }

    /// Entries each store holds before it is cleared
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    // Forward path entries

    /// Insert or overwrite the entries for (`path`, `root`)
    ///
    /// Capacity counts distinct paths; another root under a cached path
    /// never clears the store.
    pub fn add_entry(&self, path: &str, root: &str, entries: Vec<PathEntry>) {
        self.entries.upsert(path.to_owned(), |roots| {
            roots.insert(root.to_owned(), entries);
        });
    }

    /// Entries for (`path`, `root`), empty on a miss
    pub fn get_entry(&self, path: &str, root: &str) -> Vec<PathEntry> {
        self.entries
            .view(path, |roots| roots.get(root).cloned())
            .unwrap_or_default()
    }

    pub fn in_cache(&self, path: &str, root: &str) -> bool {
        self.entries.probe(path, |roots| roots.contains_key(root))
    }

    // Inverted root entries

    /// Insert or overwrite the entries for `path` in the view of `root`
    pub fn add_inverted_root_entry(&self, root: &str, path: &str, entries: Vec<PathEntry>) {
        self.inverted.upsert(root.to_owned(), |paths| {
            paths.insert(path.to_owned(), entries);
        });
    }

    pub fn in_inverted_root_cache(&self, root: &str) -> bool {
        self.inverted.contains(root)
    }

    /// Paths cached under `root`
    ///
    /// An empty `path` returns every path; otherwise the map holds at most
    /// the one requested path.
    pub fn get_inverted_root_ent(&self, root: &str, path: &str) -> RootEntries {
        self.inverted
            .view(root, |paths| {
                if path.is_empty() {
                    return Some(paths.clone());
                }
                paths
                    .get_key_value(path)
                    .map(|(p, entries)| RootEntries::from([(p.clone(), entries.clone())]))
            })
            .unwrap_or_default()
    }

    /// Write both the forward and the inverted view of one path
    pub fn cache_path_entries(&self, path: &str, root: &str, entries: Vec<PathEntry>) {
        self.add_entry(path, root, entries.clone());
        self.add_inverted_root_entry(root, path, entries);
    }

    // File contents

    pub fn add_root_file(&self, root_file: &str, contents: impl Into<String>) {
        self.roots.insert(root_file.to_owned(), contents.into());
    }

    /// Contents of `root_file`, empty on a miss
    pub fn get_root_file_contents(&self, root_file: &str) -> String {
        self.roots
            .view(root_file, |contents| Some(contents.clone()))
            .unwrap_or_default()
    }

    pub fn root_content_in_cache(&self, root_file: &str) -> bool {
        self.roots.contains(root_file)
    }

    pub fn add_node_file(&self, node_file: &str, contents: impl Into<Bytes>) {
        self.nodes.insert(node_file.to_owned(), contents.into());
    }

    pub fn get_node_file(&self, node_file: &str) -> Bytes {
        self.nodes
            .view(node_file, |contents| Some(contents.clone()))
            .unwrap_or_default()
    }

    pub fn node_content_in_cache(&self, node_file: &str) -> bool {
        self.nodes.contains(node_file)
    }

    pub fn add_data_file(&self, data_file: &str, contents: impl Into<Bytes>) {
        self.data.insert(data_file.to_owned(), contents.into());
    }

    pub fn get_data_file(&self, data_file: &str) -> Bytes {
        self.data
            .view(data_file, |contents| Some(contents.clone()))
            .unwrap_or_default()
    }

    pub fn data_content_in_cache(&self, data_file: &str) -> bool {
        self.data.contains(data_file)
    }

    /// Empty every store and reset the counters
    pub fn clear(&self) {
        self.entries.reset();
        self.inverted.reset();
        self.roots.reset();
        self.nodes.reset();
        self.data.reset();
        debug!("Metadata cache cleared");
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            entries: self.entries.stats(),
            inverted: self.inverted.stats(),
            roots: self.roots.stats(),
            nodes: self.nodes.stats(),
            data: self.data.stats(),
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::with_capacity(CacheConfig::default().capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_cache(capacity: usize) -> MetadataCache {
        MetadataCache::new(&CacheConfig { capacity }).unwrap()
    }

    fn entries(node: &str, n: u64) -> Vec<PathEntry> {
        (0..n)
            .map(|i| PathEntry::new(node, format!("ino-{i}"), i * 4096, 4096))
            .collect()
    }

    #[test]
    fn test_root_file_round_trip() {
        let cache = MetadataCache::default();
        cache.add_root_file("r1", "hello");

        assert_eq!(cache.get_root_file_contents("r1"), "hello");
        assert!(cache.root_content_in_cache("r1"));
        assert_eq!(cache.get_root_file_contents("missing"), "");
        assert!(!cache.root_content_in_cache("missing"));
    }

    #[test]
    fn test_node_and_data_files() {
        let cache = MetadataCache::default();
        cache.add_node_file("n1", Bytes::from_static(b"node bytes"));
        cache.add_data_file("d1", b"data bytes".to_vec());

        assert_eq!(cache.get_node_file("n1"), Bytes::from_static(b"node bytes"));
        assert_eq!(cache.get_data_file("d1"), Bytes::from_static(b"data bytes"));
        assert!(cache.get_node_file("d1").is_empty());
        assert!(cache.get_data_file("n1").is_empty());
        assert!(cache.node_content_in_cache("n1"));
        assert!(!cache.data_content_in_cache("n1"));
    }

    #[test]
    fn test_entry_miss_is_empty() {
        let cache = MetadataCache::default();
        assert!(cache.get_entry("/a", "r1").is_empty());
        assert!(!cache.in_cache("/a", "r1"));

        cache.add_entry("/a", "r1", entries("n1", 2));
        // Same path under another root is a different key
        assert!(cache.get_entry("/a", "r2").is_empty());
        assert_eq!(cache.get_entry("/a", "r1").len(), 2);
    }

    #[test]
    fn test_forward_store_counts_paths() {
        let cache = small_cache(2);
        cache.add_entry("/a", "r1", entries("n1", 1));
        cache.add_entry("/b", "r1", entries("n1", 1));
        // More roots under cached paths fit without a clear
        cache.add_entry("/a", "r2", entries("n2", 2));
        cache.add_entry("/b", "r3", entries("n3", 3));

        let stats = cache.stats().entries;
        assert_eq!((stats.len, stats.clears), (2, 0));
        assert_eq!(cache.get_entry("/a", "r2").len(), 2);
        assert_eq!(cache.get_entry("/b", "r3").len(), 3);
        assert!(cache.in_cache("/a", "r1"));
        assert!(!cache.in_cache("/a", "r3"));

        // A miss on an unknown root under a known path is still a miss
        assert!(cache.get_entry("/a", "r9").is_empty());
        assert_eq!(cache.stats().entries.misses, 1);

        cache.add_entry("/c", "r1", entries("n1", 1));
        assert_eq!(cache.stats().entries.clears, 1);
        assert!(!cache.in_cache("/a", "r1"));
        assert!(cache.in_cache("/c", "r1"));
    }

    #[test]
    fn test_forward_inverted_consistency() {
        let cache = MetadataCache::default();
        let e = entries("n1", 3);
        cache.add_entry("/dir/file", "r1", e.clone());
        cache.add_inverted_root_entry("r1", "/dir/file", e.clone());
        cache.cache_path_entries("/dir/other", "r1", entries("n2", 1));

        assert_eq!(cache.get_entry("/dir/file", "r1"), e);
        let filtered = cache.get_inverted_root_ent("r1", "/dir/file");
        assert_eq!(filtered, HashMap::from([("/dir/file".to_string(), e)]));

        let all = cache.get_inverted_root_ent("r1", "");
        assert_eq!(all.len(), 2);
        assert_eq!(all["/dir/other"], cache.get_entry("/dir/other", "r1"));

        assert!(cache.in_inverted_root_cache("r1"));
        assert!(!cache.in_inverted_root_cache("r2"));
        assert!(cache.get_inverted_root_ent("r2", "").is_empty());
        assert!(cache.get_inverted_root_ent("r1", "/nope").is_empty());
    }

    #[test]
    fn test_full_store_is_cleared() {
        let cache = MetadataCache::default();
        let size = cache.capacity();
        for i in 0..=size {
            cache.add_root_file(&format!("r{i}"), "x");
        }

        let stats = cache.stats();
        assert!(stats.roots.len < size + 1);
        assert_eq!(stats.roots.len, 1);
        assert_eq!(stats.roots.clears, 1);
        // The triggering insert survives the clear
        assert!(cache.root_content_in_cache(&format!("r{size}")));
        assert!(!cache.root_content_in_cache("r0"));
    }

    #[test]
    fn test_stores_clear_independently() {
        let cache = small_cache(4);
        cache.add_node_file("keep", Bytes::from_static(b"k"));
        for i in 0..5 {
            cache.add_entry(&format!("/p{i}"), "r1", entries("n1", 1));
        }

        let stats = cache.stats();
        assert_eq!(stats.entries.clears, 1);
        assert_eq!(stats.entries.len, 1);
        assert_eq!(stats.nodes.clears, 0);
        assert!(cache.node_content_in_cache("keep"));
    }

    #[test]
    fn test_overwrite_never_clears() {
        let cache = small_cache(2);
        cache.add_data_file("a", b"1".to_vec());
        cache.add_data_file("b", b"2".to_vec());
        cache.add_data_file("b", b"3".to_vec());

        assert_eq!(cache.stats().data.clears, 0);
        assert_eq!(cache.get_data_file("b"), Bytes::from_static(b"3"));
        assert!(cache.data_content_in_cache("a"));

        // New paths under a cached root do not count against capacity
        for i in 0..10 {
            cache.add_inverted_root_entry("r1", &format!("/p{i}"), entries("n1", 1));
        }
        assert_eq!(cache.stats().inverted.clears, 0);
        assert_eq!(cache.get_inverted_root_ent("r1", "").len(), 10);
    }

    #[test]
    fn test_probes_do_not_count() {
        let cache = MetadataCache::default();
        cache.add_root_file("r1", "hello");
        assert!(cache.root_content_in_cache("r1"));
        assert!(!cache.root_content_in_cache("r2"));

        let _ = cache.get_root_file_contents("r1");
        let _ = cache.get_root_file_contents("r2");
        let stats = cache.stats().roots;
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_empties_everything() {
        let cache = MetadataCache::default();
        cache.cache_path_entries("/a", "r1", entries("n1", 1));
        cache.add_root_file("r1", "x");
        cache.add_node_file("n1", b"y".to_vec());
        cache.clear();

        assert_eq!(cache.stats(), CacheStats {
            capacity: cache.capacity(),
            ..CacheStats::default()
        });
        assert!(!cache.in_cache("/a", "r1"));
        assert!(!cache.in_inverted_root_cache("r1"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MetadataCache::new(&CacheConfig { capacity: 0 }).is_err());
    }

    #[test]
    fn test_concurrent_stores() {
        let cache = Arc::new(small_cache(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let name = format!("t{t}-{i}");
                        cache.add_node_file(&name, Bytes::from(name.clone()));
                        cache.cache_path_entries(&name, "r", entries("n", 1));
                        assert!(cache.stats().nodes.len <= 64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.nodes.len <= 64);
        assert!(stats.nodes.clears > 0);
        assert!(stats.entries.len <= 64);
    }
}
