//! cachestore storage - durable store trait, cache layer and mocks
//!
//! Defines the durable store abstraction and the cache-aside layer that
//! fronts it with a volatile cache. The in-memory mocks here back the test
//! suites of this and downstream crates.

pub mod cache;
pub mod record;

pub use cache::{
    check_multi_arg, decode, decode_items, encode, encode_items, encode_keys, load_entity,
    save_entity, split_put, CacheStore, CacheStoreStats, Interfaces, Item, LoadSavers, Memcache,
    MockMemcache, MultiArg, MultiArgType, StructPtrs, Structs,
};
pub use record::{
    load_struct, save_struct, send_property, AnyLoadSaver, DynRecord, Entity, PlainRecord,
    PropertyLoadSaver, PropertyReceiver, PropertySender, RecordMut, RecordRef,
};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cachestore_core::{
    CacheStoreError, CacheStoreResult, Key, PropertyList, StoreError, DEFAULT_MAX_PUT_BATCH,
};

// ============================================================================
// DATASTORE TRAIT
// ============================================================================

/// The authoritative, persistent keyed store.
///
/// Records travel as [`PropertyList`]s. Implementations must be safe for
/// concurrent use by independent calls.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Load many records. Position `i` is `None` when `keys[i]` has no record.
    async fn get_multi(&self, keys: &[Key]) -> CacheStoreResult<Vec<Option<PropertyList>>>;

    /// Write many records, returning the keys they were written under.
    ///
    /// Incomplete keys come back completed with a store-allocated id.
    /// Batches larger than [`Datastore::max_put_batch`] are rejected.
    async fn put_multi(&self, keys: &[Key], records: Vec<PropertyList>) -> CacheStoreResult<Vec<Key>>;

    /// Delete many records. Deleting an absent key is not an error.
    async fn delete_multi(&self, keys: &[Key]) -> CacheStoreResult<()>;

    /// Largest batch accepted by one [`Datastore::put_multi`] call.
    fn max_put_batch(&self) -> usize {
        DEFAULT_MAX_PUT_BATCH
    }

    /// Load one record, failing with [`CacheStoreError::NoSuchEntity`] if absent.
    async fn get(&self, key: &Key) -> CacheStoreResult<PropertyList> {
        self.get_multi(std::slice::from_ref(key))
            .await?
            .pop()
            .flatten()
            .ok_or_else(|| CacheStoreError::no_such_entity(key))
    }

    async fn put(&self, key: &Key, record: PropertyList) -> CacheStoreResult<Key> {
        self.put_multi(std::slice::from_ref(key), vec![record])
            .await?
            .pop()
            .ok_or_else(|| {
                StoreError::ResultMismatch {
                    expected: 1,
                    got: 0,
                }
                .into()
            })
    }

    async fn delete(&self, key: &Key) -> CacheStoreResult<()> {
        self.delete_multi(std::slice::from_ref(key)).await
    }
}

// ============================================================================
// MOCK DATASTORE
// ============================================================================

/// In-memory mock datastore for testing.
///
/// Allocates sequential integer ids for incomplete keys and enforces its
/// put batch limit the way a real store would.
#[derive(Debug)]
pub struct MockDatastore {
    records: Arc<RwLock<BTreeMap<Key, PropertyList>>>,
    next_id: Arc<AtomicI64>,
    put_calls: Arc<AtomicUsize>,
    max_put_batch: usize,
}

impl Default for MockDatastore {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            put_calls: Arc::new(AtomicUsize::new(0)),
            max_put_batch: DEFAULT_MAX_PUT_BATCH,
        }
    }
}

impl MockDatastore {
    /// Create a new mock datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call put limit.
    pub fn with_max_put_batch(mut self, max: usize) -> Self {
        self.max_put_batch = max;
        self
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Remove a record behind the cache's back.
    pub fn remove(&self, key: &Key) -> Option<PropertyList> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Number of `put_multi` calls received, including rejected ones.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    fn allocate(&self, key: &Key) -> CacheStoreResult<Key> {
        if key.parent().is_some_and(Key::is_incomplete) {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "parent key is incomplete".to_string(),
            }
            .into());
        }
        if !key.is_incomplete() {
            return Ok(key.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(key.clone().complete(id))
    }
}

#[async_trait]
impl Datastore for MockDatastore {
    async fn get_multi(&self, keys: &[Key]) -> CacheStoreResult<Vec<Option<PropertyList>>> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(keys.iter().map(|key| records.get(key).cloned()).collect())
    }

    async fn put_multi(&self, keys: &[Key], records: Vec<PropertyList>) -> CacheStoreResult<Vec<Key>> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if keys.len() > self.max_put_batch {
            return Err(StoreError::BatchTooLarge {
                size: keys.len(),
                max: self.max_put_batch,
            }
            .into());
        }
        if keys.len() != records.len() {
            return Err(StoreError::ResultMismatch {
                expected: keys.len(),
                got: records.len(),
            }
            .into());
        }

        let completed = keys
            .iter()
            .map(|key| self.allocate(key))
            .collect::<CacheStoreResult<Vec<Key>>>()?;

        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        for (key, record) in completed.iter().zip(records) {
            stored.insert(key.clone(), record);
        }
        Ok(completed)
    }

    async fn delete_multi(&self, keys: &[Key]) -> CacheStoreResult<()> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        for key in keys {
            stored.remove(key);
        }
        Ok(())
    }

    fn max_put_batch(&self) -> usize {
        self.max_put_batch
    }
}

// ============================================================================
// TESTS
// ============================================================================
