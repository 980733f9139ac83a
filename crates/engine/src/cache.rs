use crate::registry::CachedValue;
use keepsake_common::{CacheKey, Saveable, SlotId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide mapping from (key, slot) to the latest known instance.
///
/// Entries are replaced whole, so readers never observe a partially
/// updated instance. Writes happen only at bootstrap apply and after a
/// successful save, both on the dispatch thread.
#[derive(Default)]
pub struct Cache {
    map: RwLock<HashMap<CacheKey, CachedValue>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance for `(T::KEY, slot)`, or a fresh default when absent.
    ///
    /// Absence is never an error and does not populate the cache.
    pub fn get<T: Saveable>(&self, slot: SlotId) -> Arc<T> {
        let key = CacheKey::new(T::KEY, slot);
        if let Some(entry) = self.map.read().get(&key) {
            if let Ok(concrete) = Arc::clone(entry).downcast::<T>() {
                return concrete;
            }
        }
        Arc::new(T::default())
    }

    /// Erased lookup, used by the coordinator's save-all path.
    pub(crate) fn get_raw(&self, key: &'static str, slot: SlotId) -> Option<CachedValue> {
        self.map.read().get(&CacheKey::new(key, slot)).cloned()
    }

    /// Replace (or create) one entry atomically.
    pub(crate) fn insert(&self, key: &'static str, slot: SlotId, value: CachedValue) {
        self.map.write().insert(CacheKey::new(key, slot), value);
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        value: i32,
    }

    impl Saveable for Counter {
        const KEY: &'static str = "Counter";
    }

    #[test]
    fn missing_entry_yields_default() {
        let cache = Cache::new();
        let counter = cache.get::<Counter>(SlotId(1));
        assert_eq!(counter.value, 0);
        // The miss did not populate the cache.
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_then_get() {
        let cache = Cache::new();
        cache.insert(Counter::KEY, SlotId(1), Arc::new(Counter { value: 5 }));
        assert_eq!(cache.get::<Counter>(SlotId(1)).value, 5);
    }

    #[test]
    fn slots_are_isolated() {
        let cache = Cache::new();
        cache.insert(Counter::KEY, SlotId(1), Arc::new(Counter { value: 5 }));
        assert_eq!(cache.get::<Counter>(SlotId(2)).value, 0);
    }

    #[test]
    fn replacement_swaps_whole_entry() {
        let cache = Cache::new();
        cache.insert(Counter::KEY, SlotId(1), Arc::new(Counter { value: 1 }));
        let before = cache.get::<Counter>(SlotId(1));
        cache.insert(Counter::KEY, SlotId(1), Arc::new(Counter { value: 2 }));
        // A reader holding the old Arc keeps the old instance intact.
        assert_eq!(before.value, 1);
        assert_eq!(cache.get::<Counter>(SlotId(1)).value, 2);
    }
}
