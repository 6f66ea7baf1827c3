//! Bounded cache of filtered query results keyed by the normalised filter set.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::query::filters::QueryKey;
use crate::table::Table;

pub const DEFAULT_RESULT_CACHE_CAPACITY: usize = 5;

/// Fixed-capacity map of filtered results; the oldest insertion is evicted.
#[derive(Debug, Clone)]
pub struct ResultCache {
    entries: IndexMap<QueryKey, Arc<Table>>,
    capacity: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_CACHE_CAPACITY)
    }
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Arc<Table>> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: QueryKey, result: Arc<Table>) {
        self.entries.shift_remove(&key);
        self.entries.insert(key, result);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: &str) -> QueryKey {
        vec![("Class".to_string(), v.to_string())]
    }

    #[test]
    fn test_oldest_entry_is_evicted() {
        let mut cache = ResultCache::new(2);
        cache.insert(key("M1"), Arc::new(Table::new()));
        cache.insert(key("M2"), Arc::new(Table::new()));
        cache.insert(key("M3"), Arc::new(Table::new()));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("M1")).is_none());
        assert!(cache.get(&key("M3")).is_some());
    }

    #[test]
    fn test_get_returns_shared_result() {
        let mut cache = ResultCache::default();
        let table = Arc::new(Table::new());
        cache.insert(key("M3"), Arc::clone(&table));
        let hit = cache.get(&key("M3")).unwrap();
        assert!(Arc::ptr_eq(&hit, &table));
        cache.clear();
        assert!(cache.is_empty());
    }
}
