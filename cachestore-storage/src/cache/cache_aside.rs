//! Cache-aside orchestration over a durable store and a volatile cache.

use std::collections::HashMap;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cachestore_core::{
    CacheStoreConfig, CacheStoreError, CacheStoreResult, Key, MultiError, ShapeError, StoreError,
};

use super::batch::split_put;
use super::cache_key::encode_keys;
use super::codec::{decode_items, encode_items_where, load_entity, save_entity};
use super::multi_arg::{check_lengths, check_multi_arg, check_no_nil, MultiArg, SingleMut, SingleRef};
use super::traits::{CacheStoreStats, Item, Memcache};
use crate::record::{Entity, RecordMut, RecordRef};
use crate::Datastore;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    store_reads: AtomicU64,
    cache_writes: AtomicU64,
    cache_errors: AtomicU64,
}

/// Cache-aside store.
///
/// Every call is an independent run against the two backends; the only
/// state shared between calls is the statistics counters.
///
/// # Type Parameters
///
/// - `D`: The authoritative durable store
/// - `M`: The volatile cache
pub struct CacheStore<D, M>
where
    D: Datastore,
    M: Memcache,
{
    datastore: Arc<D>,
    memcache: Arc<M>,
    config: CacheStoreConfig,
    counters: Arc<Counters>,
}

impl<D, M> CacheStore<D, M>
where
    D: Datastore,
    M: Memcache,
{
    /// Create a new cache store, rejecting an unusable configuration.
    pub fn new(datastore: Arc<D>, memcache: Arc<M>, config: CacheStoreConfig) -> CacheStoreResult<Self> {
        config.validate()?;
        Ok(Self {
            datastore,
            memcache,
            config,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Create a new cache store with default configuration.
    pub fn with_defaults(datastore: Arc<D>, memcache: Arc<M>) -> Self {
        Self {
            datastore,
            memcache,
            config: CacheStoreConfig::default(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CacheStoreConfig {
        &self.config
    }

    /// Get a reference to the durable store.
    pub fn datastore(&self) -> &D {
        &self.datastore
    }

    /// Get a reference to the volatile cache.
    pub fn memcache(&self) -> &M {
        &self.memcache
    }

    /// Snapshot of the counters, shared by all clones of this store.
    pub fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            store_reads: self.counters.store_reads.load(Ordering::Relaxed),
            cache_writes: self.counters.cache_writes.load(Ordering::Relaxed),
            cache_errors: self.counters.cache_errors.load(Ordering::Relaxed),
        }
    }

    /// Largest batch sent to the store in one write.
    fn put_window(&self) -> usize {
        self.config.max_put_batch.min(self.datastore.max_put_batch())
    }

    // ========================================================================
    // GET
    // ========================================================================

    /// Load the records for `keys` into `dst`, position for position.
    ///
    /// The cache answers only when it holds every key. Otherwise the whole
    /// batch is read from the store and the records that loaded are written
    /// back to the cache. Keys with no stored record fail with
    /// [`CacheStoreError::NoSuchEntity`] at their position.
    pub async fn get_multi<A>(&self, keys: &[Key], dst: &mut A) -> CacheStoreResult<()>
    where
        A: MultiArg + ?Sized,
    {
        check_multi_arg(&*dst)?;
        check_lengths(keys.len(), dst.len())?;
        if keys.is_empty() {
            return Ok(());
        }
        let result = self.get_batch(keys, dst).await;
        unwrap_single(keys.len(), result)
    }

    async fn get_batch<A>(&self, keys: &[Key], dst: &mut A) -> CacheStoreResult<()>
    where
        A: MultiArg + ?Sized,
    {
        let buffer = self.config.property_buffer;
        let cache_keys = encode_keys(keys);

        let items = match self.memcache.get_multi(&cache_keys).await {
            Ok(items) => items,
            Err(e) => {
                self.cache_failure("get", &e);
                HashMap::new()
            }
        };

        if cache_keys.iter().all(|k| items.contains_key(k)) {
            match decode_items(keys, &items, dst, buffer).await {
                Ok(()) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    if self.config.debug {
                        tracing::debug!(keys = keys.len(), "Served batch from cache");
                    }
                    return Ok(());
                }
                // An unreadable entry is a cache fault; the store still has the record.
                Err(e) => self.cache_failure("decode", &e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if self.config.debug {
            tracing::debug!(
                keys = keys.len(),
                cached = items.len(),
                "Cache incomplete, reading batch from store"
            );
        }
        self.load_from_store(keys, dst).await
    }

    async fn load_from_store<A>(&self, keys: &[Key], dst: &mut A) -> CacheStoreResult<()>
    where
        A: MultiArg + ?Sized,
    {
        let buffer = self.config.property_buffer;

        self.counters.store_reads.fetch_add(1, Ordering::Relaxed);
        let records = self.datastore.get_multi(keys).await?;
        if records.len() != keys.len() {
            return Err(StoreError::ResultMismatch {
                expected: keys.len(),
                got: records.len(),
            }
            .into());
        }

        let mut errors: Vec<Option<CacheStoreError>> = vec![None; keys.len()];
        for (i, (key, record)) in keys.iter().zip(records).enumerate() {
            let Some(properties) = record else {
                errors[i] = Some(CacheStoreError::no_such_entity(key));
                continue;
            };
            let Some(slot) = dst.record_mut(i) else {
                errors[i] = Some(ShapeError::NilElement { index: i }.into());
                continue;
            };
            if let Err(e) = load_entity(slot, properties, buffer).await {
                errors[i] = Some(e);
            }
        }

        let (items, failures) =
            encode_items_where(keys, &*dst, buffer, |i| errors[i].is_none()).await;
        for (_, e) in &failures {
            self.cache_failure("encode", e);
        }
        self.write_cache(items).await;

        match MultiError::from_results(errors) {
            Some(multi) => Err(multi.into()),
            None => Ok(()),
        }
    }

    // ========================================================================
    // PUT
    // ========================================================================

    /// Write `src` under `keys`, store first, then cache.
    ///
    /// Returns the keys the records were written under, with incomplete keys
    /// completed by the store. Only complete keys are cached. Records that
    /// cannot be converted fail at their position before anything is
    /// written. A store failure is returned as is; nothing is cached and the
    /// cache entries of the batch's complete keys are dropped.
    pub async fn put_multi<A>(&self, keys: &[Key], src: &A) -> CacheStoreResult<Vec<Key>>
    where
        A: MultiArg + ?Sized,
    {
        check_multi_arg(src)?;
        check_lengths(keys.len(), src.len())?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        check_no_nil(src)?;
        let result = self.put_batch(keys, src).await;
        unwrap_single(keys.len(), result)
    }

    async fn put_batch<A>(&self, keys: &[Key], src: &A) -> CacheStoreResult<Vec<Key>>
    where
        A: MultiArg + ?Sized,
    {
        let buffer = self.config.property_buffer;

        let mut records = Vec::with_capacity(keys.len());
        let mut errors: Vec<Option<CacheStoreError>> = vec![None; keys.len()];
        for (i, slot) in errors.iter_mut().enumerate() {
            let Some(record) = src.record(i) else {
                *slot = Some(ShapeError::NilElement { index: i }.into());
                continue;
            };
            match save_entity(record, buffer).await {
                Ok(properties) => records.push(properties),
                Err(e) => *slot = Some(e),
            }
        }
        if let Some(multi) = MultiError::from_results(errors) {
            return Err(multi.into());
        }

        let written = match split_put(&*self.datastore, keys, records, self.put_window()).await {
            Ok(written) => written,
            Err(e) => {
                // Earlier windows may have overwritten records the cache still holds.
                self.invalidate_cache(keys).await;
                return Err(e);
            }
        };
        if self.config.debug {
            tracing::debug!(keys = written.len(), "Wrote batch to store");
        }

        let (items, failures) = encode_items_where(&written, src, buffer, |_| true).await;
        for (_, e) in &failures {
            self.cache_failure("encode", e);
        }
        self.write_cache(items).await;

        Ok(written)
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    /// Delete `keys` from both tiers.
    ///
    /// The two deletes run concurrently. Only the store's outcome is
    /// returned; keys already absent from the cache are not an error.
    pub async fn delete_multi(&self, keys: &[Key]) -> CacheStoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let cache_keys = encode_keys(keys);
        let (cached, stored) = tokio::join!(
            self.memcache.delete_multi(&cache_keys),
            self.datastore.delete_multi(keys)
        );
        if let Err(e) = cached {
            if !only_cache_misses(&e) {
                self.cache_failure("delete", &e);
            }
        }
        if self.config.debug && stored.is_ok() {
            tracing::debug!(keys = keys.len(), "Deleted batch");
        }
        unwrap_single(keys.len(), stored)
    }

    // ========================================================================
    // SINGULAR FORMS
    // ========================================================================

    /// Load the record for `key` into `dst`.
    pub async fn get(&self, key: &Key, dst: RecordMut<'_>) -> CacheStoreResult<()> {
        self.get_multi(slice::from_ref(key), &mut SingleMut(dst))
            .await
    }

    /// Write one record, returning the key it was written under.
    pub async fn put(&self, key: &Key, src: RecordRef<'_>) -> CacheStoreResult<Key> {
        self.put_multi(slice::from_ref(key), &SingleRef(src))
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

    /// Delete one record from both tiers.
    pub async fn delete(&self, key: &Key) -> CacheStoreResult<()> {
        self.delete_multi(slice::from_ref(key)).await
    }

    /// Load a plain record by key.
    pub async fn get_entity<T: Entity>(&self, key: &Key) -> CacheStoreResult<T> {
        let mut record = T::default();
        self.get(key, RecordMut::entity(&mut record)).await?;
        Ok(record)
    }

    /// Write a plain record, returning the key it was written under.
    pub async fn put_entity<T: Entity>(&self, key: &Key, record: &T) -> CacheStoreResult<Key> {
        self.put(key, RecordRef::entity(record)).await
    }

    // ========================================================================
    // CACHE HELPERS
    // ========================================================================

    async fn write_cache(&self, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }
        let count = items.len() as u64;
        match self.memcache.set_multi(items).await {
            Ok(()) => {
                self.counters.cache_writes.fetch_add(count, Ordering::Relaxed);
                if self.config.debug {
                    tracing::debug!(items = count, "Populated cache");
                }
            }
            Err(e) => self.cache_failure("set", &e),
        }
    }

    async fn invalidate_cache(&self, keys: &[Key]) {
        let cache_keys: Vec<String> = keys
            .iter()
            .filter(|key| !key.is_incomplete())
            .map(Key::encode)
            .collect();
        if cache_keys.is_empty() {
            return;
        }
        match self.memcache.delete_multi(&cache_keys).await {
            Ok(()) => {
                if self.config.debug {
                    tracing::debug!(keys = cache_keys.len(), "Invalidated cache after failed write");
                }
            }
            Err(e) if only_cache_misses(&e) => {}
            Err(e) => self.cache_failure("invalidate", &e),
        }
    }

    fn cache_failure(&self, operation: &'static str, error: &CacheStoreError) {
        self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            error = %error,
            operation,
            "Cache operation failed, continuing without cache"
        );
    }
}

impl<D, M> Clone for CacheStore<D, M>
where
    D: Datastore,
    M: Memcache,
{
    fn clone(&self) -> Self {
        Self {
            datastore: Arc::clone(&self.datastore),
            memcache: Arc::clone(&self.memcache),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

/// A batch of one reports its error bare.
fn unwrap_single<T>(len: usize, result: CacheStoreResult<T>) -> CacheStoreResult<T> {
    if len == 1 {
        result.map_err(CacheStoreError::into_single_error)
    } else {
        result
    }
}

fn only_cache_misses(error: &CacheStoreError) -> bool {
    match error {
        CacheStoreError::Multi(multi) => multi.errors().iter().flatten().all(|e| e.is_cache_miss()),
        other => other.is_cache_miss(),
    }
}
