//! Concurrent Entity Store
//!
//! Explicit key-value store with first-class per-key lock acquisition.
//! Cascading logic reads a copy so no lock is held across multi-entity
//! operations; check-then-set writes run inside `with_write`.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-key locked store of clonable values
#[derive(Debug)]
pub struct SharedStore<V> {
    entries: Arc<DashMap<u64, Arc<RwLock<V>>>>,
}

impl<V> Clone for SharedStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V> Default for SharedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SharedStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, id: u64, value: V) {
        self.entries.insert(id, Arc::new(RwLock::new(value)));
    }

    pub fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // The entry Arc is cloned out before awaiting the lock so no DashMap
    // shard guard is held across an await point.
    fn slot(&self, id: u64) -> Option<Arc<RwLock<V>>> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Run `f` under the per-key read lock.
    pub async fn with_read<R>(&self, id: u64, f: impl FnOnce(&V) -> R) -> Option<R> {
        let slot = self.slot(id)?;
        let guard = slot.read().await;
        Some(f(&guard))
    }

    /// Run `f` under the per-key write lock, making check-then-set atomic
    /// against concurrent signals for the same key.
    pub async fn with_write<R>(&self, id: u64, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let slot = self.slot(id)?;
        let mut guard = slot.write().await;
        Some(f(&mut guard))
    }
}

impl<V: Clone> SharedStore<V> {
    /// Copy-out read for cascading logic.
    pub async fn get_copy(&self, id: u64) -> Option<V> {
        self.with_read(id, |v| v.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_copy_out() {
        let store: SharedStore<String> = SharedStore::new();
        store.insert(1, "one".to_string());

        assert!(store.contains(1));
        assert_eq!(store.get_copy(1).await, Some("one".to_string()));
        assert_eq!(store.get_copy(2).await, None);
    }

    #[tokio::test]
    async fn test_with_write_check_and_set() {
        let store: SharedStore<u32> = SharedStore::new();
        store.insert(1, 0);

        let changed = store
            .with_write(1, |v| {
                if *v == 0 {
                    *v = 7;
                    true
                } else {
                    false
                }
            })
            .await;
        assert_eq!(changed, Some(true));
        assert_eq!(store.get_copy(1).await, Some(7));

        let missing = store.with_write(2, |_| true).await;
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_remove() {
        let store: SharedStore<u32> = SharedStore::new();
        store.insert(1, 1);
        assert!(store.remove(1));
        assert!(!store.remove(1));
        assert!(store.is_empty());
    }
}
