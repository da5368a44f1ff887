//! Property-Based Tests for the Cache-Aside Store
//!
//! Exercises `CacheStore` end to end over the in-memory backends:
//! - Records read back equal the records written, from either tier
//! - A cached entry is served even after the store record is gone
//! - Batch results line up with the caller's key order
//! - A missing key fails only its own position
//! - A batch of one reports its error bare
//! - Cache failures never fail a call the store completed
//! - Oversized writes are split without changing the outcome
//! - Incomplete keys never reach the cache

use std::collections::BTreeMap;

use cachestore_test_utils::assertions::{
    assert_failed_positions, assert_no_such_entity, assert_shape_error,
};
use cachestore_test_utils::fixtures::{
    flaky_store, incomplete_keys, int_keys, mock_store, Note, Struct,
};
use cachestore_test_utils::generators::{
    arb_distinct_keys, arb_note, arb_property_list, arb_struct,
};
use cachestore_test_utils::{
    init_tracing, CacheStoreError, DynRecord, Entity, Interfaces, Key, LoadSavers, Memcache,
    Property, PropertyList, SerializationError, StoreError, StructPtrs, Structs,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

/// Plain record the store cannot represent: nested objects have no
/// property form.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Nested {
    inner: BTreeMap<String, i64>,
}

impl Entity for Nested {}

fn nested() -> Nested {
    Nested {
        inner: [("a".to_string(), 1)].into_iter().collect(),
    }
}

/// Plain record holding references to other entities.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Assignment {
    title: String,
    owner: Option<Key>,
    watchers: Vec<Key>,
}

impl Entity for Assignment {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    n: u64,
}

impl Entity for Counter {}

// ============================================================================
// ROUND-TRIP AND TRANSPARENCY
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Plain records read back equal from the cache and from the store.
    #[test]
    fn prop_plain_records_roundtrip(notes in prop::collection::vec(arb_note(), 1..20)) {
        init_tracing();
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = mock_store();
            let src = Structs(notes);
            let keys = store.put_multi(&incomplete_keys("Note", src.0.len()), &src).await?;

            let mut from_cache = Structs(vec![Note::default(); keys.len()]);
            store.get_multi(&keys, &mut from_cache).await?;
            prop_assert_eq!(&from_cache, &src);

            store.memcache().clear();
            let mut from_store: StructPtrs<Note> = StructPtrs(vec![None; keys.len()]);
            store.get_multi(&keys, &mut from_store).await?;
            for (got, want) in from_store.0.iter().zip(&src.0) {
                prop_assert_eq!(got.as_deref(), Some(want));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Custom records read back equal from the cache and from the store.
    #[test]
    fn prop_custom_records_roundtrip(lists in prop::collection::vec(arb_property_list(), 1..10)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = mock_store();
            let src = LoadSavers(lists);
            let keys = store.put_multi(&incomplete_keys("List", src.0.len()), &src).await?;

            let mut from_cache = LoadSavers(vec![PropertyList::new(); keys.len()]);
            store.get_multi(&keys, &mut from_cache).await?;
            prop_assert_eq!(&from_cache, &src);

            store.memcache().clear();
            let mut from_store = LoadSavers(vec![Box::new(PropertyList::new()); keys.len()]);
            store.get_multi(&keys, &mut from_store).await?;
            for (got, want) in from_store.0.iter().zip(&src.0) {
                prop_assert_eq!(&**got, want);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// A cached entry wins over a store record removed behind its back.
    #[test]
    fn prop_cache_served_after_store_removal(note in arb_note()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = mock_store();
            let key = store.put_entity(&Key::incomplete("Note", None), &note).await?;

            prop_assert!(store.datastore().remove(&key).is_some());
            let got: Note = store.get_entity(&key).await?;
            prop_assert_eq!(got, note);
            prop_assert_eq!(store.stats().store_reads, 0);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn test_key_fields_roundtrip() {
    let store = mock_store();
    let src = Assignment {
        title: "review".to_string(),
        owner: Some(Key::with_id("User", 7, None)),
        watchers: vec![
            Key::with_name("User", "ann", None),
            Key::with_id("User", 9, Some(Key::with_name("Org", "acme", None))),
        ],
    };
    let key = store
        .put_entity(&Key::incomplete("Assignment", None), &src)
        .await
        .unwrap();

    let from_cache: Assignment = store.get_entity(&key).await.unwrap();
    assert_eq!(from_cache, src);
    assert_eq!(store.stats().store_reads, 0);

    store.memcache().clear();
    let from_store: Assignment = store.get_entity(&key).await.unwrap();
    assert_eq!(from_store, src);
    assert_eq!(store.stats().store_reads, 1);
}

#[tokio::test]
async fn test_unrepresentable_integer_fails_before_write() {
    let store = mock_store();

    let result = store
        .put_entity(&Key::incomplete("Counter", None), &Counter { n: u64::MAX })
        .await;
    assert!(matches!(
        result,
        Err(CacheStoreError::Serialization(SerializationError::UnsupportedField { .. }))
    ));
    assert_eq!(store.datastore().put_calls(), 0);
    assert!(store.memcache().is_empty());

    let key = store
        .put_entity(&Key::incomplete("Counter", None), &Counter { n: i64::MAX as u64 })
        .await
        .unwrap();
    store.memcache().clear();
    let got: Counter = store.get_entity(&key).await.unwrap();
    assert_eq!(got.n, i64::MAX as u64);
}

// ============================================================================
// ORDER AND PARTIAL FAILURE
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Results follow the caller's key order on every path.
    #[test]
    fn prop_batch_order_preserved(
        keys in arb_distinct_keys(2..25),
        evict in any::<prop::sample::Index>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = mock_store();
            let src = Structs((0..keys.len() as i64).map(|i| Struct { i }).collect());
            let written = store.put_multi(&keys, &src).await?;
            prop_assert_eq!(&written, &keys);

            let reversed: Vec<Key> = keys.iter().rev().cloned().collect();
            let expected: Vec<Struct> = src.0.iter().rev().cloned().collect();

            // Entirely from the cache.
            let mut dst = Structs(vec![Struct::default(); keys.len()]);
            store.get_multi(&reversed, &mut dst).await?;
            prop_assert_eq!(&dst.0, &expected);

            // One entry evicted, so the whole batch comes from the store.
            let evicted = &reversed[evict.index(reversed.len())];
            store.memcache().delete(&evicted.encode()).await?;
            let mut dst = Structs(vec![Struct::default(); keys.len()]);
            store.get_multi(&reversed, &mut dst).await?;
            prop_assert_eq!(&dst.0, &expected);
            prop_assert_eq!(store.stats().misses, 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// One missing key fails only its own position.
    #[test]
    fn prop_missing_key_isolated(
        values in prop::collection::vec(arb_struct(), 2..20),
        missing in any::<prop::sample::Index>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = mock_store();
            let mut keys = store
                .put_multi(&incomplete_keys("Struct", values.len()), &Structs(values.clone()))
                .await?;
            let m = missing.index(keys.len());
            keys[m] = Key::with_name("Struct", "never-written", None);

            let mut dst = Structs(vec![Struct::default(); keys.len()]);
            let result = store.get_multi(&keys, &mut dst).await;
            let multi = assert_failed_positions(&result, &[m]);
            prop_assert!(multi.get(m).is_some_and(CacheStoreError::is_no_such_entity));

            for (i, (got, want)) in dst.0.iter().zip(&values).enumerate() {
                if i != m {
                    prop_assert_eq!(got, want);
                }
            }
            prop_assert!(!store.memcache().contains(&keys[m].encode()));
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// SINGLE VS BATCH ERRORS
// ============================================================================

#[tokio::test]
async fn test_single_get_error_is_bare() {
    let store = mock_store();
    let key = Key::with_id("Note", 404, None);

    let mut dst = Structs(vec![Note::default()]);
    let result = store.get_multi(std::slice::from_ref(&key), &mut dst).await;
    assert_no_such_entity(&result, &key);

    let result = store.get_entity::<Note>(&key).await;
    assert_no_such_entity(&result, &key);
}

#[tokio::test]
async fn test_single_put_error_is_bare() {
    let store = mock_store();

    let result = store.put_entity(&Key::incomplete("Nested", None), &nested()).await;
    assert!(matches!(
        result,
        Err(CacheStoreError::Serialization(SerializationError::UnsupportedField { .. }))
    ));

    let result = store
        .put_multi(
            &incomplete_keys("Mixed", 2),
            &Interfaces(vec![DynRecord::entity(Struct { i: 1 }), DynRecord::entity(nested())]),
        )
        .await;
    assert_failed_positions(&result, &[1]);
    assert!(store.datastore().is_empty());
}

#[tokio::test]
async fn test_single_delete_error_is_bare() {
    let store = flaky_store(100).unwrap();
    store.datastore().fail_deletes(true);

    let err = store.delete(&Key::with_id("Note", 1, None)).await.unwrap_err();
    assert!(matches!(err, CacheStoreError::Store(StoreError::Unavailable { .. })));
}

// ============================================================================
// CACHE FAILURES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Writes and reads succeed with a cache that fails every call.
    #[test]
    fn prop_writes_survive_cache_failure(notes in prop::collection::vec(arb_note(), 1..10)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = flaky_store(100)?;
            store.memcache().fail_all(true);

            let src = Structs(notes);
            let keys = store.put_multi(&incomplete_keys("Note", src.0.len()), &src).await?;
            prop_assert_eq!(store.datastore().inner().len(), src.0.len());

            let mut dst = Structs(vec![Note::default(); keys.len()]);
            store.get_multi(&keys, &mut dst).await?;
            prop_assert_eq!(&dst, &src);

            store.delete_multi(&keys).await?;
            prop_assert!(store.datastore().inner().is_empty());

            let stats = store.stats();
            // set after put, get and set on read, delete
            prop_assert_eq!(stats.cache_errors, 4);
            prop_assert_eq!(stats.cache_writes, 0);
            prop_assert!(store.memcache().inner().is_empty());
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn test_store_failure_on_read_is_returned() {
    let store = flaky_store(100).unwrap();
    let keys = store
        .put_multi(&incomplete_keys("Struct", 2), &Structs(vec![Struct { i: 1 }, Struct { i: 2 }]))
        .await
        .unwrap();
    store.memcache().inner().clear();
    store.datastore().fail_gets(true);

    let mut dst = Structs(vec![Struct::default(); 2]);
    let err = store.get_multi(&keys, &mut dst).await.unwrap_err();
    assert!(matches!(err, CacheStoreError::Store(StoreError::Unavailable { .. })));
}

#[tokio::test]
async fn test_cache_delete_failure_keeps_store_delete() {
    let store = flaky_store(100).unwrap();
    let key = store
        .put_entity(&Key::incomplete("Struct", None), &Struct { i: 1 })
        .await
        .unwrap();
    store.memcache().fail_deletes(true);

    store.delete(&key).await.unwrap();
    assert!(!store.datastore().inner().contains(&key));
    assert_eq!(store.stats().cache_errors, 1);
}

// ============================================================================
// SPLITTING
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// A split write lands the same records as one unsplit write.
    #[test]
    fn prop_split_put_is_transparent(
        values in prop::collection::vec(arb_struct(), 1..60),
        window in 1usize..10,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = flaky_store(window)?;
            let src = Structs(values);
            let keys = store.put_multi(&incomplete_keys("Struct", src.0.len()), &src).await?;

            prop_assert_eq!(store.datastore().inner().put_calls(), src.0.len().div_ceil(window));
            let unique: std::collections::BTreeSet<&Key> = keys.iter().collect();
            prop_assert_eq!(unique.len(), keys.len());

            store.memcache().inner().clear();
            let mut dst = Structs(vec![Struct::default(); keys.len()]);
            store.get_multi(&keys, &mut dst).await?;
            prop_assert_eq!(&dst, &src);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test]
async fn test_failed_window_aborts_put() {
    let store = flaky_store(3).unwrap();
    store.datastore().fail_put_call(1);

    let src = Structs((0..7).map(|i| Struct { i }).collect());
    let err = store
        .put_multi(&incomplete_keys("Struct", 7), &src)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheStoreError::Store(StoreError::Unavailable { .. })));

    // The first window stays written; nothing is cached.
    assert_eq!(store.datastore().inner().len(), 3);
    assert_eq!(store.datastore().inner().put_calls(), 1);
    assert!(store.memcache().inner().is_empty());
}

#[tokio::test]
async fn test_failed_window_invalidates_overwritten_entries() {
    let store = flaky_store(2).unwrap();
    let keys = int_keys("Struct", 4);
    let old = Structs((0..4).map(|i| Struct { i }).collect());
    store.put_multi(&keys, &old).await.unwrap();
    assert_eq!(store.memcache().inner().len(), 4);

    // Calls 0 and 1 wrote the old values; the second window of the rewrite fails.
    store.datastore().fail_put_call(3);
    let new = Structs((100..104).map(|i| Struct { i }).collect());
    let err = store.put_multi(&keys, &new).await.unwrap_err();
    assert!(matches!(err, CacheStoreError::Store(StoreError::Unavailable { .. })));
    assert!(store.memcache().inner().is_empty());

    let mut dst = Structs(vec![Struct::default(); 4]);
    store.get_multi(&keys, &mut dst).await.unwrap();
    assert_eq!(
        dst.0,
        vec![Struct { i: 100 }, Struct { i: 101 }, Struct { i: 2 }, Struct { i: 3 }]
    );
    assert_eq!(store.stats().cache_errors, 0);
}

#[tokio::test]
async fn test_failed_invalidation_is_counted() {
    let store = flaky_store(2).unwrap();
    let keys = int_keys("Struct", 4);
    store
        .put_multi(&keys, &Structs((0..4).map(|i| Struct { i }).collect()))
        .await
        .unwrap();

    store.datastore().fail_put_call(3);
    store.memcache().fail_deletes(true);
    let result = store
        .put_multi(&keys, &Structs((100..104).map(|i| Struct { i }).collect()))
        .await;
    assert!(matches!(result, Err(CacheStoreError::Store(StoreError::Unavailable { .. }))));
    assert_eq!(store.stats().cache_errors, 1);
}

// ============================================================================
// INCOMPLETE KEYS
// ============================================================================

#[tokio::test]
async fn test_only_completed_keys_are_cached() {
    let store = mock_store();
    let keys = vec![
        Key::incomplete("Struct", None),
        Key::with_name("Struct", "fixed", None),
        Key::incomplete("Struct", None),
    ];
    let src = Structs(vec![Struct { i: 1 }, Struct { i: 2 }, Struct { i: 3 }]);
    let written = store.put_multi(&keys, &src).await.unwrap();

    let mut cached = store.memcache().keys();
    cached.sort();
    let mut expected: Vec<String> = written.iter().map(Key::encode).collect();
    expected.sort();
    assert_eq!(cached, expected);
    assert!(!store.memcache().contains(&Key::incomplete("Struct", None).encode()));
}

#[tokio::test]
async fn test_unresolved_keys_are_never_cached() {
    let store = mock_store();
    let orphan = Key::incomplete("Struct", Some(Key::incomplete("Parent", None)));

    let err = store.put_entity(&orphan, &Struct { i: 1 }).await.unwrap_err();
    assert!(matches!(err, CacheStoreError::Store(StoreError::InvalidKey { .. })));
    assert!(!store.memcache().contains(&orphan.encode()));
    assert!(store.memcache().is_empty());
}

// ============================================================================
// SHAPES
// ============================================================================

#[tokio::test]
async fn test_mixed_records_roundtrip() {
    let store = mock_store();
    let list = PropertyList::from(vec![Property::new("S", "x")]);
    let src = Interfaces(vec![
        DynRecord::entity(Struct { i: 5 }),
        DynRecord::load_saver(list.clone()),
    ]);
    let keys = store.put_multi(&int_keys("Mixed", 2), &src).await.unwrap();

    for evict in [false, true] {
        if evict {
            store.memcache().clear();
        }
        let mut dst = Interfaces(vec![
            DynRecord::entity(Struct::default()),
            DynRecord::load_saver(PropertyList::new()),
        ]);
        store.get_multi(&keys, &mut dst).await.unwrap();
        assert_eq!(dst.0[0].downcast_ref::<Struct>(), Some(&Struct { i: 5 }));
        assert_eq!(dst.0[1].downcast_ref::<PropertyList>(), Some(&list));
    }
}

#[tokio::test]
async fn test_property_list_batch_is_rejected() {
    let store = mock_store();
    let mut list = PropertyList::from(vec![Property::new("S", "x")]);

    let result = store.put_multi(&int_keys("List", 1), &list).await;
    assert_shape_error(&result);

    let result = store.get_multi(&int_keys("List", 1), &mut list).await;
    assert_shape_error(&result);
    assert_eq!(store.datastore().put_calls(), 0);
}
