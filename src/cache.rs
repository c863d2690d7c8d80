use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Bounded id -> entity cache, one per entity type. The store is always the
/// source of truth: every mutation writes through before the cached copy is
/// replaced, and eviction never writes back.
pub struct EntityCache<T: Clone> {
    inner: Mutex<LruCache<String, T>>,
}

impl<T: Clone> EntityCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        EntityCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, id: &str) -> Option<T> {
        let mut cache = self.inner.lock().unwrap();
        cache.get(id).cloned()
    }

    pub fn put(&self, id: &str, entity: T) {
        let mut cache = self.inner.lock().unwrap();
        cache.put(id.to_string(), entity);
    }

    pub fn remove(&self, id: &str) {
        let mut cache = self.inner.lock().unwrap();
        cache.pop(id);
    }

    pub fn clear(&self) {
        let mut cache = self.inner.lock().unwrap();
        cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_the_entry() {
        let cache = EntityCache::new(4);
        cache.put("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = EntityCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get("a");
        cache.put("c", 3);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn remove_and_clear() {
        let cache = EntityCache::new(4);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.remove("a");
        assert_eq!(cache.get("a"), None);
        cache.clear();
        assert_eq!(cache.get("b"), None);
    }
}
