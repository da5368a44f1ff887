//! cachestore Test Utilities
//!
//! Shared test infrastructure for the cachestore workspace:
//! - Proptest generators for keys, properties and records
//! - Record fixtures covering each record capability
//! - Fault-injecting backends for exercising the failure policy
//! - Custom assertions for batch results

// Re-export mocks from their source crate
pub use cachestore_storage::{MockDatastore, MockMemcache};

// Re-export core types for convenience
pub use cachestore_core::{
    CacheError, CacheStoreConfig, CacheStoreError, CacheStoreResult, Key, KeyId, MultiError,
    Property, PropertyList, PropertyValue, SerializationError, ShapeError, StoreError, Timestamp,
};
pub use cachestore_storage::{
    CacheStore, Datastore, DynRecord, Entity, Interfaces, Item, LoadSavers, Memcache,
    PropertyLoadSaver, PropertyReceiver, PropertySender, RecordMut, RecordRef, StructPtrs, Structs,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

fn injected_cache_failure() -> CacheStoreError {
    CacheError::Unavailable {
        reason: "injected failure".to_string(),
    }
    .into()
}

fn injected_store_failure() -> CacheStoreError {
    StoreError::Unavailable {
        reason: "injected failure".to_string(),
    }
    .into()
}

/// A [`MockMemcache`] whose operations can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyMemcache {
    inner: MockMemcache,
    fail_gets: AtomicBool,
    fail_sets: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyMemcache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache behind the fault switches.
    pub fn inner(&self) -> &MockMemcache {
        &self.inner
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail, or none.
    pub fn fail_all(&self, fail: bool) {
        self.fail_gets(fail);
        self.fail_sets(fail);
        self.fail_deletes(fail);
    }
}

#[async_trait]
impl Memcache for FlakyMemcache {
    async fn get_multi(&self, keys: &[String]) -> CacheStoreResult<HashMap<String, Item>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(injected_cache_failure());
        }
        self.inner.get_multi(keys).await
    }

    async fn set_multi(&self, items: Vec<Item>) -> CacheStoreResult<()> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(injected_cache_failure());
        }
        self.inner.set_multi(items).await
    }

    async fn delete_multi(&self, keys: &[String]) -> CacheStoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected_cache_failure());
        }
        self.inner.delete_multi(keys).await
    }
}

/// A [`MockDatastore`] whose operations can be made to fail.
#[derive(Debug)]
pub struct FlakyDatastore {
    inner: MockDatastore,
    put_calls: AtomicUsize,
    fail_put_call: AtomicUsize,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FlakyDatastore {
    pub fn new(inner: MockDatastore) -> Self {
        Self {
            inner,
            put_calls: AtomicUsize::new(0),
            fail_put_call: AtomicUsize::new(usize::MAX),
            fail_gets: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// The store behind the fault switches.
    pub fn inner(&self) -> &MockDatastore {
        &self.inner
    }

    /// Fail the `put_multi` call with this zero-based index. Failed calls
    /// never reach the inner store.
    pub fn fail_put_call(&self, call: usize) {
        self.fail_put_call.store(call, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl Default for FlakyDatastore {
    fn default() -> Self {
        Self::new(MockDatastore::new())
    }
}

#[async_trait]
impl Datastore for FlakyDatastore {
    async fn get_multi(&self, keys: &[Key]) -> CacheStoreResult<Vec<Option<PropertyList>>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(injected_store_failure());
        }
        self.inner.get_multi(keys).await
    }

    async fn put_multi(&self, keys: &[Key], records: Vec<PropertyList>) -> CacheStoreResult<Vec<Key>> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst);
        if call == self.fail_put_call.load(Ordering::SeqCst) {
            return Err(injected_store_failure());
        }
        self.inner.put_multi(keys, records).await
    }

    async fn delete_multi(&self, keys: &[Key]) -> CacheStoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected_store_failure());
        }
        self.inner.delete_multi(keys).await
    }

    fn max_put_batch(&self) -> usize {
        self.inner.max_put_batch()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys, properties and records.

    use super::*;
    use crate::fixtures::{Note, Struct};
    use proptest::prelude::*;

    /// Generate an entity kind.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{0,7}"
    }

    /// Generate a complete key with no parent.
    pub fn arb_root_key() -> impl Strategy<Value = Key> {
        prop_oneof![
            (arb_kind(), 1i64..i64::MAX).prop_map(|(kind, id)| Key::with_id(kind, id, None)),
            (arb_kind(), ".{1,16}").prop_map(|(kind, name)| Key::with_name(kind, name, None)),
        ]
    }

    /// Generate a complete key, possibly with a parent.
    pub fn arb_key() -> impl Strategy<Value = Key> {
        (arb_root_key(), proptest::option::of(arb_root_key())).prop_map(|(key, parent)| {
            match (parent, key.id().clone()) {
                (None, _) => key,
                (Some(parent), KeyId::Int(id)) => Key::with_id(key.kind(), id, Some(parent)),
                (Some(parent), KeyId::Name(name)) => Key::with_name(key.kind(), name, Some(parent)),
                (Some(parent), KeyId::Incomplete) => Key::incomplete(key.kind(), Some(parent)),
            }
        })
    }

    /// Generate `len` distinct complete keys.
    pub fn arb_distinct_keys(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Key>> {
        proptest::collection::btree_set(arb_key(), len).prop_map(|keys| keys.into_iter().collect())
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Whole seconds within 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default()
        })
    }

    /// Generate a property value. Floats are always finite.
    pub fn arb_property_value() -> impl Strategy<Value = PropertyValue> {
        prop_oneof![
            Just(PropertyValue::Null),
            any::<i64>().prop_map(PropertyValue::Int),
            any::<bool>().prop_map(PropertyValue::Bool),
            (-1.0e12f64..1.0e12).prop_map(PropertyValue::Float),
            ".{0,24}".prop_map(PropertyValue::String),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(PropertyValue::Bytes),
            arb_timestamp().prop_map(PropertyValue::Time),
            arb_key().prop_map(PropertyValue::from),
        ]
    }

    pub fn arb_property() -> impl Strategy<Value = Property> {
        ("[a-z]{1,8}", arb_property_value(), any::<bool>(), any::<bool>()).prop_map(
            |(name, value, multiple, no_index)| Property {
                name,
                value,
                multiple,
                no_index,
            },
        )
    }

    pub fn arb_property_list() -> impl Strategy<Value = PropertyList> {
        proptest::collection::vec(arb_property(), 0..12).prop_map(PropertyList::from)
    }

    pub fn arb_struct() -> impl Strategy<Value = Struct> {
        any::<i64>().prop_map(|i| Struct { i })
    }

    pub fn arb_note() -> impl Strategy<Value = Note> {
        (
            ".{0,32}",
            0i64..6,
            any::<bool>(),
            proptest::collection::vec("[a-z]{1,6}", 0..4),
            proptest::option::of(arb_timestamp()),
        )
            .prop_map(|(title, stars, pinned, tags, created)| Note {
                title,
                stars,
                pinned,
                tags,
                created,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Record types and pre-wired stores.

    use super::*;
    use serde::{Deserialize, Serialize};

    /// Smallest plain record.
    #[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Struct {
        pub i: i64,
    }

    impl Entity for Struct {}

    /// Plain record with a multi-valued field and an optional timestamp.
    #[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Note {
        pub title: String,
        pub stars: i64,
        pub pinned: bool,
        pub tags: Vec<String>,
        pub created: Option<Timestamp>,
    }

    impl Entity for Note {}

    /// Custom record that marks its value on every save and load.
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct Saver {
        pub s: String,
    }

    impl Saver {
        pub fn new(s: impl Into<String>) -> Self {
            Self { s: s.into() }
        }
    }

    #[async_trait]
    impl PropertyLoadSaver for Saver {
        async fn load(&mut self, mut properties: PropertyReceiver) -> CacheStoreResult<()> {
            while let Some(property) = properties.recv().await {
                if property.name != "S" {
                    continue;
                }
                if let PropertyValue::String(s) = property.value {
                    self.s = s;
                }
            }
            self.s.push_str(".load");
            Ok(())
        }

        async fn save(&self, properties: PropertySender) -> CacheStoreResult<()> {
            cachestore_storage::send_property(&properties, Property::new("S", format!("{}.save", self.s)))
                .await
        }
    }

    pub type MockCacheStore = CacheStore<MockDatastore, MockMemcache>;

    pub type FlakyCacheStore = CacheStore<FlakyDatastore, FlakyMemcache>;

    /// A cache store over fresh in-memory backends.
    pub fn mock_store() -> MockCacheStore {
        CacheStore::with_defaults(Arc::new(MockDatastore::new()), Arc::new(MockMemcache::new()))
    }

    /// A cache store over backends with fault switches, writing to the
    /// store in windows of at most `max_put_batch` keys.
    pub fn flaky_store(max_put_batch: usize) -> CacheStoreResult<FlakyCacheStore> {
        let datastore = FlakyDatastore::new(MockDatastore::new().with_max_put_batch(max_put_batch));
        CacheStore::new(
            Arc::new(datastore),
            Arc::new(FlakyMemcache::new()),
            CacheStoreConfig::new().with_debug(true),
        )
    }

    /// `n` incomplete keys of one kind.
    pub fn incomplete_keys(kind: &str, n: usize) -> Vec<Key> {
        (0..n).map(|_| Key::incomplete(kind, None)).collect()
    }

    /// `n` complete keys `1..=n` of one kind.
    pub fn int_keys(kind: &str, n: usize) -> Vec<Key> {
        (1..=n as i64).map(|id| Key::with_id(kind, id, None)).collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for batch results.

    use super::*;

    /// Assert that a result is a bare no-such-entity error for `key`.
    #[track_caller]
    pub fn assert_no_such_entity<T: std::fmt::Debug>(result: &CacheStoreResult<T>, key: &Key) {
        match result {
            Err(CacheStoreError::NoSuchEntity { key: k }) => {
                assert_eq!(k, key, "Wrong key in NoSuchEntity error");
            }
            other => panic!("Expected NoSuchEntity for {key}, got: {other:?}"),
        }
    }

    /// Assert that a result is a per-position error failing exactly at
    /// `positions`, and return it.
    #[track_caller]
    pub fn assert_failed_positions<T: std::fmt::Debug>(
        result: &CacheStoreResult<T>,
        positions: &[usize],
    ) -> MultiError {
        match result {
            Err(CacheStoreError::Multi(multi)) => {
                assert_eq!(multi.failed_positions(), positions, "Wrong failed positions");
                multi.clone()
            }
            other => panic!("Expected a multi error at {positions:?}, got: {other:?}"),
        }
    }

    /// Assert that a result is a shape error.
    #[track_caller]
    pub fn assert_shape_error<T: std::fmt::Debug>(result: &CacheStoreResult<T>) {
        match result {
            Err(CacheStoreError::Shape(_)) => {}
            other => panic!("Expected Shape error, got: {other:?}"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
