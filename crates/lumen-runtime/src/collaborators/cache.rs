//! Result cache storage used by cached script functions.
//!
//! A [`CacheStorageManager`] hands out one [`CacheStorage`] per cached
//! function. Storages are shared across sessions; `ClearCache` from any client
//! empties all of them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

/// Identifies the cached function a storage belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheStorageContext {
    /// Stable key of the cached function.
    pub function_key: String,
    /// Entry bound; `None` means unbounded.
    pub max_entries: Option<usize>,
}

impl CacheStorageContext {
    /// Unbounded storage for `function_key`.
    pub fn new(function_key: impl Into<String>) -> Self {
        Self {
            function_key: function_key.into(),
            max_entries: None,
        }
    }

    /// Bound the storage to `max_entries` (oldest insert evicted first).
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

/// Key/value storage for one cached function.
pub trait CacheStorage: Send + Sync {
    /// Fetch a value.
    fn get(&self, key: &str) -> Option<Arc<Vec<u8>>>;
    /// Store a value.
    fn set(&self, key: &str, value: Vec<u8>);
    /// Remove a value. Returns whether it existed.
    fn delete(&self, key: &str) -> bool;
    /// Remove every value.
    fn clear(&self);
}

/// Creates and clears cache storages.
pub trait CacheStorageManager: Send + Sync {
    /// Storage for a cached function. Repeated calls with the same function
    /// key return the same storage.
    fn create(&self, context: &CacheStorageContext) -> Arc<dyn CacheStorage>;

    /// Empty every storage this manager created.
    fn clear_all(&self);
}

#[derive(Default)]
struct CacheEntries {
    values: HashMap<String, Arc<Vec<u8>>>,
    insertion_order: VecDeque<String>,
}

/// In-memory storage with optional FIFO eviction.
pub struct MemoryCacheStorage {
    max_entries: Option<usize>,
    entries: Mutex<CacheEntries>,
}

impl MemoryCacheStorage {
    fn new(max_entries: Option<usize>) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(CacheEntries::default()),
        }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        let mut entries = self.entries.lock();
        if entries
            .values
            .insert(key.to_owned(), Arc::new(value))
            .is_none()
        {
            entries.insertion_order.push_back(key.to_owned());
        }
        if let Some(max) = self.max_entries {
            while entries.values.len() > max {
                let Some(oldest) = entries.insertion_order.pop_front() else {
                    break;
                };
                let _ = entries.values.remove(&oldest);
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.values.remove(key).is_some();
        if removed {
            entries.insertion_order.retain(|k| k != key);
        }
        removed
    }

    fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.values.clear();
        entries.insertion_order.clear();
    }
}

/// In-memory cache storage manager.
#[derive(Default)]
pub struct MemoryCacheStorageManager {
    storages: Mutex<HashMap<String, Arc<MemoryCacheStorage>>>,
}

impl MemoryCacheStorageManager {
    /// Create a manager with no storages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of storages created so far.
    pub fn storage_count(&self) -> usize {
        self.storages.lock().len()
    }
}

impl CacheStorageManager for MemoryCacheStorageManager {
    fn create(&self, context: &CacheStorageContext) -> Arc<dyn CacheStorage> {
        let mut storages = self.storages.lock();
        let storage = storages
            .entry(context.function_key.clone())
            .or_insert_with(|| {
                debug!(function_key = %context.function_key, "cache storage created");
                Arc::new(MemoryCacheStorage::new(context.max_entries))
            });
        Arc::clone(storage) as Arc<dyn CacheStorage>
    }

    fn clear_all(&self) {
        let storages = self.storages.lock();
        for storage in storages.values() {
            storage.clear();
        }
        info!(storages = storages.len(), "all caches cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mgr = MemoryCacheStorageManager::new();
        let storage = mgr.create(&CacheStorageContext::new("f"));
        storage.set("k", b"v".to_vec());
        assert_eq!(storage.get("k").as_deref(), Some(&b"v".to_vec()));
        assert!(storage.delete("k"));
        assert!(!storage.delete("k"));
        assert!(storage.get("k").is_none());
    }

    #[test]
    fn same_key_returns_same_storage() {
        let mgr = MemoryCacheStorageManager::new();
        let a = mgr.create(&CacheStorageContext::new("f"));
        let b = mgr.create(&CacheStorageContext::new("f"));
        a.set("k", vec![1]);
        assert!(b.get("k").is_some());
        assert_eq!(mgr.storage_count(), 1);
    }

    #[test]
    fn bounded_storage_evicts_oldest() {
        let mgr = MemoryCacheStorageManager::new();
        let storage = mgr.create(&CacheStorageContext::new("f").with_max_entries(2));
        storage.set("a", vec![1]);
        storage.set("b", vec![2]);
        storage.set("a", vec![3]);
        storage.set("c", vec![4]);
        assert!(storage.get("a").is_none());
        assert!(storage.get("b").is_some());
        assert!(storage.get("c").is_some());
    }

    #[test]
    fn clear_all_empties_every_storage() {
        let mgr = MemoryCacheStorageManager::new();
        let f = mgr.create(&CacheStorageContext::new("f"));
        let g = mgr.create(&CacheStorageContext::new("g"));
        f.set("k", vec![1]);
        g.set("k", vec![2]);
        mgr.clear_all();
        assert!(f.get("k").is_none());
        assert!(g.get("k").is_none());
    }
}
