//! Volatile cache backend trait and cache entry type.
//!
//! The cache is keyed by strings produced by [`Key::encode`] and holds
//! opaque byte payloads. It makes no ordering or durability promises;
//! entries may vanish at any time.
//!
//! [`Key::encode`]: cachestore_core::Key::encode

use std::collections::HashMap;

use async_trait::async_trait;
use cachestore_core::{CacheError, CacheStoreResult};

/// A cache entry: an encoded key and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Volatile cache backend.
///
/// Implementations must be safe for concurrent use by independent calls.
/// Only the batch methods are required; the singular forms default to
/// them.
#[async_trait]
pub trait Memcache: Send + Sync {
    /// Look up many keys at once.
    ///
    /// The result holds only the keys that were found. Missing keys are not
    /// an error, and the map carries no ordering.
    async fn get_multi(&self, keys: &[String]) -> CacheStoreResult<HashMap<String, Item>>;

    /// Store many entries, replacing any existing values.
    async fn set_multi(&self, items: Vec<Item>) -> CacheStoreResult<()>;

    /// Remove many keys. Keys already absent are not an error.
    async fn delete_multi(&self, keys: &[String]) -> CacheStoreResult<()>;

    /// Look up one key, failing with [`CacheError::CacheMiss`] if it is absent.
    async fn get(&self, key: &str) -> CacheStoreResult<Item> {
        let mut found = self.get_multi(&[key.to_string()]).await?;
        found.remove(key).ok_or_else(|| {
            CacheError::CacheMiss {
                key: key.to_string(),
            }
            .into()
        })
    }

    async fn set(&self, item: Item) -> CacheStoreResult<()> {
        self.set_multi(vec![item]).await
    }

    async fn delete(&self, key: &str) -> CacheStoreResult<()> {
        self.delete_multi(&[key.to_string()]).await
    }
}

/// Counters describing how a [`CacheStore`](super::CacheStore) has been
/// served since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStoreStats {
    /// Batch reads answered entirely from the cache.
    pub hits: u64,
    /// Batch reads that fell back to the durable store.
    pub misses: u64,
    /// Durable-store batch reads issued.
    pub store_reads: u64,
    /// Cache entries written.
    pub cache_writes: u64,
    /// Cache failures that were logged and swallowed.
    pub cache_errors: u64,
}

impl CacheStoreStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
