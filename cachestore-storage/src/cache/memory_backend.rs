//! In-memory cache backend for testing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cachestore_core::{CacheError, CacheStoreResult};

use super::traits::{Item, Memcache};

/// In-memory [`Memcache`] for testing. Never evicts.
#[derive(Debug, Clone, Default)]
pub struct MockMemcache {
    items: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MockMemcache {
    /// Create a new, empty mock cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry exists for the encoded key.
    pub fn contains(&self, key: &str) -> bool {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// All encoded keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every entry, as if the cache had evicted everything.
    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Memcache for MockMemcache {
    async fn get_multi(&self, keys: &[String]) -> CacheStoreResult<HashMap<String, Item>> {
        let items = self.items.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                items
                    .get(key)
                    .map(|value| (key.clone(), Item::new(key.clone(), value.clone())))
            })
            .collect())
    }

    async fn set_multi(&self, new_items: Vec<Item>) -> CacheStoreResult<()> {
        let mut items = self.items.write().map_err(|_| CacheError::LockPoisoned)?;
        for item in new_items {
            items.insert(item.key, item.value);
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> CacheStoreResult<()> {
        let mut items = self.items.write().map_err(|_| CacheError::LockPoisoned)?;
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}
