//! Splitting oversized writes into store-sized windows.

use cachestore_core::{
    CacheStoreError, CacheStoreResult, Key, MultiError, PropertyList, ShapeError, StoreError,
};

use crate::Datastore;

/// Write `records` under `keys` in windows of at most `max_batch` keys.
///
/// Returned keys line up with `keys`, with incomplete keys replaced by the
/// ids the store allocated. The first failing window aborts the call.
/// Windows before it remain written; later windows are never sent. A
/// per-position error from the failing window is widened to the whole
/// batch, with never-sent positions reported as [`StoreError::Aborted`].
pub async fn split_put<D: Datastore + ?Sized>(
    datastore: &D,
    keys: &[Key],
    records: Vec<PropertyList>,
    max_batch: usize,
) -> CacheStoreResult<Vec<Key>> {
    if keys.len() != records.len() {
        return Err(ShapeError::LengthMismatch {
            keys: keys.len(),
            records: records.len(),
        }
        .into());
    }
    let max_batch = max_batch.max(1);

    let mut written = Vec::with_capacity(keys.len());
    let mut records = records.into_iter();
    for (window, window_keys) in keys.chunks(max_batch).enumerate() {
        let window_records: Vec<PropertyList> = records.by_ref().take(window_keys.len()).collect();
        let start = window * max_batch;

        let window_written = datastore
            .put_multi(window_keys, window_records)
            .await
            .map_err(|e| widen_window_error(e, start, window_keys.len(), keys.len()))?;

        if window_written.len() != window_keys.len() {
            return Err(StoreError::ResultMismatch {
                expected: window_keys.len(),
                got: window_written.len(),
            }
            .into());
        }
        written.extend(window_written);
    }
    Ok(written)
}

fn widen_window_error(err: CacheStoreError, start: usize, len: usize, total: usize) -> CacheStoreError {
    let multi = match err {
        CacheStoreError::Multi(multi) => multi,
        other => return other,
    };
    if multi.len() != len {
        return CacheStoreError::Multi(multi);
    }

    let mut errors: Vec<Option<CacheStoreError>> = vec![None; start];
    errors.extend(multi.into_errors());
    errors.resize(total, Some(StoreError::Aborted.into()));
    match MultiError::from_results(errors) {
        Some(widened) => widened.into(),
        None => StoreError::Aborted.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockDatastore;
    use cachestore_core::{Property, PropertyValue};

    fn batch(n: usize) -> (Vec<Key>, Vec<PropertyList>) {
        let keys = (0..n).map(|_| Key::incomplete("Note", None)).collect();
        let records = (0..n)
            .map(|i| PropertyList::from(vec![Property::new("i", i as i64)]))
            .collect();
        (keys, records)
    }

    #[tokio::test]
    async fn test_split_put_preserves_order() {
        let store = MockDatastore::new().with_max_put_batch(3);
        let (keys, records) = batch(10);

        let written = split_put(&store, &keys, records, 3).await.unwrap();
        assert_eq!(written.len(), 10);
        assert_eq!(store.put_calls(), 4);

        let loaded = store.get_multi(&written).await.unwrap();
        for (i, record) in loaded.into_iter().enumerate() {
            let record = record.unwrap();
            assert_eq!(
                record.get("i").map(|p| &p.value),
                Some(&PropertyValue::Int(i as i64))
            );
        }
    }

    #[tokio::test]
    async fn test_split_put_exact_multiple() {
        let store = MockDatastore::new();
        let (keys, records) = batch(6);
        split_put(&store, &keys, records, 3).await.unwrap();
        assert_eq!(store.put_calls(), 2);
        assert_eq!(store.len(), 6);
    }

    #[tokio::test]
    async fn test_split_put_window_overflow_is_rejected_by_store() {
        let store = MockDatastore::new().with_max_put_batch(2);
        let (keys, records) = batch(3);
        let err = split_put(&store, &keys, records, 3).await.unwrap_err();
        assert_eq!(
            err,
            CacheStoreError::Store(StoreError::BatchTooLarge { size: 3, max: 2 })
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_split_put_length_mismatch() {
        let store = MockDatastore::new();
        let (keys, _) = batch(2);
        let err = split_put(&store, &keys, vec![], 10).await.unwrap_err();
        assert!(matches!(err, CacheStoreError::Shape(_)));
        assert_eq!(store.put_calls(), 0);
    }

    #[test]
    fn test_widen_window_error() {
        let window = MultiError::from_results(vec![None, Some(StoreError::LockPoisoned.into())])
            .unwrap();
        let widened = widen_window_error(window.into(), 2, 2, 6);
        let CacheStoreError::Multi(multi) = widened else {
            panic!("expected a multi error");
        };
        assert_eq!(multi.len(), 6);
        assert_eq!(multi.failed_positions(), vec![3, 4, 5]);
        assert_eq!(multi.get(4), Some(&CacheStoreError::Store(StoreError::Aborted)));
    }

    #[test]
    fn test_widen_passes_through_batch_errors() {
        let err = CacheStoreError::Store(StoreError::LockPoisoned);
        assert_eq!(widen_window_error(err.clone(), 0, 1, 3), err);
    }
}
