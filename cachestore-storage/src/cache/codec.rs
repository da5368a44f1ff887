//! Record encoder/decoder and cache item assembly.
//!
//! Cache payloads are private to this module and carry no compatibility
//! guarantee across versions. A plain record is stored as its whole value;
//! a custom-serializable record is stored as the property list it streams,
//! in the property model's own serde form.
//!
//! Property streaming overlaps the record's own save or load routine with
//! collection or replay of the properties over a bounded channel. Both
//! sides are polled together on the caller's task and nothing outlives the
//! call. The collecting side always drains the channel to the end, so a
//! producer can never stay blocked on a full buffer.

use std::collections::HashMap;

use bincode::Options;
use cachestore_core::{
    CacheStoreError, CacheStoreResult, Key, MultiError, Property, PropertyList,
    SerializationError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;

use super::cache_key::encode_keys;
use super::multi_arg::MultiArg;
use super::traits::Item;
use crate::record::{PropertyReceiver, PropertySender, RecordMut, RecordRef};

/// Hard upper bound on a payload we will attempt to decode.
///
/// A corrupt length prefix should fail the decode, not request an
/// enormous allocation.
pub const PAYLOAD_LIMIT_BYTES: u64 = 32 * 1024 * 1024;

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn bincode_serialize<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Vec<u8>, SerializationError> {
    bincode_options()
        .serialize(value)
        .map_err(|e| SerializationError::Encode {
            reason: e.to_string(),
        })
}

pub(crate) fn bincode_deserialize<T: DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, SerializationError> {
    bincode_options()
        .with_limit(PAYLOAD_LIMIT_BYTES)
        .deserialize(bytes)
        .map_err(|e| SerializationError::Decode {
            reason: e.to_string(),
        })
}

// ============================================================================
// PROPERTY STREAMING
// ============================================================================

/// Drain the stream to its end.
async fn collect_properties(mut rx: PropertyReceiver) -> PropertyList {
    let mut properties = PropertyList::new();
    while let Some(property) = rx.recv().await {
        properties.push(property);
    }
    properties
}

/// Replay properties until done or until the consumer hangs up.
async fn replay_properties<I>(tx: PropertySender, properties: I)
where
    I: IntoIterator<Item = Property>,
{
    for property in properties {
        if tx.send(property).await.is_err() {
            break;
        }
    }
}

/// Produce the store representation of a record.
pub async fn save_entity(src: RecordRef<'_>, buffer: usize) -> CacheStoreResult<PropertyList> {
    match src {
        RecordRef::Struct(record) => Ok(record.to_properties()?),
        RecordRef::LoadSaver(record) => {
            let (tx, rx) = mpsc::channel(buffer);
            let (saved, properties) = tokio::join!(record.save(tx), collect_properties(rx));
            saved?;
            Ok(properties)
        }
    }
}

/// Load the store representation of a record into `dst`.
pub async fn load_entity(
    dst: RecordMut<'_>,
    properties: PropertyList,
    buffer: usize,
) -> CacheStoreResult<()> {
    match dst {
        RecordMut::Struct(record) => Ok(record.from_properties(properties)?),
        RecordMut::LoadSaver(record) => {
            let (tx, rx) = mpsc::channel(buffer);
            let ((), loaded) = tokio::join!(replay_properties(tx, properties), record.load(rx));
            loaded
        }
    }
}

/// Encode a record into a cache payload.
pub async fn encode(src: RecordRef<'_>, buffer: usize) -> CacheStoreResult<Vec<u8>> {
    match src {
        RecordRef::Struct(record) => Ok(record.to_payload()?),
        RecordRef::LoadSaver(_) => {
            let properties = save_entity(src, buffer).await?;
            Ok(bincode_serialize(&properties)?)
        }
    }
}

/// Decode a cache payload into `dst`.
///
/// A payload that fails to decode leaves `dst` untouched.
pub async fn decode(bytes: &[u8], dst: RecordMut<'_>, buffer: usize) -> CacheStoreResult<()> {
    match dst {
        RecordMut::Struct(record) => Ok(record.from_payload(bytes)?),
        RecordMut::LoadSaver(_) => {
            let properties: PropertyList = bincode_deserialize(bytes)?;
            load_entity(dst, properties, buffer).await
        }
    }
}

// ============================================================================
// CACHE ITEMS
// ============================================================================

/// Encode cache items for the positions of `src` selected by `include`.
///
/// Incomplete keys are never cached. Returns the items plus the encode
/// failures by position; a failure only drops that one item.
pub(crate) async fn encode_items_where<A, F>(
    keys: &[Key],
    src: &A,
    buffer: usize,
    include: F,
) -> (Vec<Item>, Vec<(usize, CacheStoreError)>)
where
    A: MultiArg + ?Sized,
    F: Fn(usize) -> bool,
{
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if key.is_incomplete() || !include(i) {
            continue;
        }
        let Some(record) = src.record(i) else {
            continue;
        };
        match encode(record, buffer).await {
            Ok(value) => items.push(Item::new(key.encode(), value)),
            Err(e) => failures.push((i, e)),
        }
    }
    (items, failures)
}

/// Encode a cache item for every complete key of the batch.
///
/// Fails on the first record that cannot be encoded.
pub async fn encode_items<A>(keys: &[Key], src: &A, buffer: usize) -> CacheStoreResult<Vec<Item>>
where
    A: MultiArg + ?Sized,
{
    let (items, mut failures) = encode_items_where(keys, src, buffer, |_| true).await;
    if failures.is_empty() {
        Ok(items)
    } else {
        Err(failures.swap_remove(0).1)
    }
}

/// Decode `items` into `dst`, matching each item to its key's position.
///
/// The item map is unordered, so order comes from `keys`. A key with no
/// item reports [`CacheStoreError::NoSuchEntity`] at its position.
pub async fn decode_items<A>(
    keys: &[Key],
    items: &HashMap<String, Item>,
    dst: &mut A,
    buffer: usize,
) -> CacheStoreResult<()>
where
    A: MultiArg + ?Sized,
{
    let encoded = encode_keys(keys);
    let mut errors = vec![None; keys.len()];
    for (i, (key, cache_key)) in keys.iter().zip(&encoded).enumerate() {
        let Some(item) = items.get(cache_key) else {
            errors[i] = Some(CacheStoreError::no_such_entity(key));
            continue;
        };
        let Some(record) = dst.record_mut(i) else {
            errors[i] = Some(cachestore_core::ShapeError::NilElement { index: i }.into());
            continue;
        };
        if let Err(e) = decode(&item.value, record, buffer).await {
            errors[i] = Some(e);
        }
    }
    match MultiError::from_results(errors) {
        Some(multi) => Err(multi.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::multi_arg::{LoadSavers, StructPtrs, Structs};
    use crate::record::{send_property, Entity, PropertyLoadSaver};
    use async_trait::async_trait;
    use cachestore_core::{PropertyValue, DEFAULT_PROPERTY_BUFFER};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Plain {
        i: i64,
    }

    impl Entity for Plain {}

    /// Tags its value on save and on load so both routines are observable.
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tagged {
        s: String,
    }

    #[async_trait]
    impl PropertyLoadSaver for Tagged {
        async fn load(&mut self, mut properties: PropertyReceiver) -> CacheStoreResult<()> {
            while let Some(p) = properties.recv().await {
                if let (true, PropertyValue::String(s)) = (p.name == "S", p.value) {
                    self.s = s;
                }
            }
            self.s.push_str(".load");
            Ok(())
        }

        async fn save(&self, properties: PropertySender) -> CacheStoreResult<()> {
            send_property(&properties, Property::new("S", format!("{}.save", self.s))).await
        }
    }

    /// Streams many properties, then fails.
    struct FailingSaver;

    #[async_trait]
    impl PropertyLoadSaver for FailingSaver {
        async fn load(&mut self, _properties: PropertyReceiver) -> CacheStoreResult<()> {
            Err(SerializationError::Decode {
                reason: "refused".to_string(),
            }
            .into())
        }

        async fn save(&self, properties: PropertySender) -> CacheStoreResult<()> {
            for i in 0..100i64 {
                send_property(&properties, Property::new("n", i)).await?;
            }
            Err(SerializationError::Encode {
                reason: "refused".to_string(),
            }
            .into())
        }
    }

    fn keys(kind: &str, n: i64) -> Vec<Key> {
        (1..=n).map(|i| Key::with_id(kind, i, None)).collect()
    }

    fn item_map(items: Vec<Item>) -> HashMap<String, Item> {
        items.into_iter().map(|item| (item.key.clone(), item)).collect()
    }

    const BUF: usize = DEFAULT_PROPERTY_BUFFER;

    #[tokio::test]
    async fn test_decode_struct_array() {
        let src = Structs((1..=10).map(|i| Plain { i }).collect());
        let keys = keys("Plain", 10);
        let items = encode_items(&keys, &src, BUF).await.unwrap();
        assert_eq!(items.len(), 10);

        let mut dst = Structs(vec![Plain::default(); 10]);
        decode_items(&keys, &item_map(items), &mut dst, BUF).await.unwrap();
        assert_eq!(src.0, dst.0);
    }

    #[tokio::test]
    async fn test_decode_struct_array_to_pointer_array() {
        let src = Structs((1..=10).map(|i| Plain { i }).collect());
        let keys = keys("Plain", 10);
        let items = encode_items(&keys, &src, BUF).await.unwrap();

        let mut dst: StructPtrs<Plain> = StructPtrs(vec![None; 10]);
        decode_items(&keys, &item_map(items), &mut dst, BUF).await.unwrap();
        for (d, s) in dst.0.iter().zip(&src.0) {
            assert_eq!(d.as_deref(), Some(s));
        }
    }

    #[tokio::test]
    async fn test_decode_pointer_array_to_struct_array() {
        let src = StructPtrs((1..=10).map(|i| Some(Box::new(Plain { i }))).collect());
        let keys = keys("Plain", 10);
        let items = encode_items(&keys, &src, BUF).await.unwrap();

        let mut dst = Structs(vec![Plain::default(); 10]);
        decode_items(&keys, &item_map(items), &mut dst, BUF).await.unwrap();
        for (d, s) in dst.0.iter().zip(&src.0) {
            assert_eq!(Some(d), s.as_deref());
        }
    }

    #[tokio::test]
    async fn test_decode_load_saver_array() {
        let src = LoadSavers((1..=10).map(|i| Tagged { s: i.to_string() }).collect());
        let keys = keys("Tagged", 10);
        let items = encode_items(&keys, &src, BUF).await.unwrap();

        let mut dst = LoadSavers(vec![Tagged::default(); 10]);
        decode_items(&keys, &item_map(items), &mut dst, BUF).await.unwrap();
        for (d, s) in dst.0.iter().zip(&src.0) {
            assert_eq!(d.s, format!("{}.save.load", s.s));
        }
    }

    #[tokio::test]
    async fn test_decode_load_saver_array_to_boxed() {
        let src = LoadSavers((1..=10).map(|i| Tagged { s: i.to_string() }).collect());
        let keys = keys("Tagged", 10);
        let items = encode_items(&keys, &src, BUF).await.unwrap();

        let mut dst = LoadSavers(vec![Box::new(Tagged::default()); 10]);
        decode_items(&keys, &item_map(items), &mut dst, BUF).await.unwrap();
        for (d, s) in dst.0.iter().zip(&src.0) {
            assert_eq!(d.s, format!("{}.save.load", s.s));
        }
    }

    #[tokio::test]
    async fn test_encode_items_skips_incomplete_keys() {
        let src = Structs(vec![Plain { i: 1 }, Plain { i: 2 }]);
        let keys = vec![Key::with_id("Plain", 1, None), Key::incomplete("Plain", None)];
        let items = encode_items(&keys, &src, BUF).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, keys[0].encode());
    }

    #[tokio::test]
    async fn test_decode_items_missing_item_is_per_position() {
        let src = Structs(vec![Plain { i: 1 }, Plain { i: 2 }, Plain { i: 3 }]);
        let keys = keys("Plain", 3);
        let mut items = item_map(encode_items(&keys, &src, BUF).await.unwrap());
        items.remove(&keys[1].encode());

        let mut dst = Structs(vec![Plain::default(); 3]);
        let err = decode_items(&keys, &items, &mut dst, BUF).await.unwrap_err();
        let CacheStoreError::Multi(multi) = err else {
            panic!("expected a multi error, got {err:?}");
        };
        assert_eq!(multi.failed_positions(), vec![1]);
        assert!(multi.get(1).unwrap().is_no_such_entity());
        assert_eq!(dst.0[0], Plain { i: 1 });
        assert_eq!(dst.0[2], Plain { i: 3 });
    }

    #[tokio::test]
    async fn test_encode_drains_producer_on_error() {
        // A buffer of one forces the producer to block unless fully drained.
        let err = encode(RecordRef::LoadSaver(&FailingSaver), 1).await.unwrap_err();
        assert!(matches!(
            err,
            CacheStoreError::Serialization(SerializationError::Encode { .. })
        ));
    }

    #[tokio::test]
    async fn test_decode_stops_producer_when_load_fails() {
        let src = PropertyList::from(
            (0..100i64)
                .map(|i| Property::new("n", i))
                .collect::<Vec<_>>(),
        );
        let bytes = encode(RecordRef::load_saver(&src), 1).await.unwrap();
        let mut dst = FailingSaver;
        let err = decode(&bytes, RecordMut::load_saver(&mut dst), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheStoreError::Serialization(SerializationError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_decode_garbage_leaves_destination_untouched() {
        let mut dst = Tagged { s: "keep".to_string() };
        let err = decode(&[0xff, 0xff, 0xff], RecordMut::load_saver(&mut dst), BUF)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheStoreError::Serialization(_)));
        assert_eq!(dst.s, "keep");
    }

    #[tokio::test]
    async fn test_key_values_come_back_as_references() {
        let target = Key::with_name("Notebook", "work", None);
        let src = PropertyList::from(vec![
            Property::new("owner", target.clone()),
            Property::multiple("tags", "a"),
            Property::new("blob", vec![1u8, 2, 3]).with_no_index(),
        ]);
        let bytes = encode(RecordRef::load_saver(&src), BUF).await.unwrap();

        let mut dst = PropertyList::new();
        decode(&bytes, RecordMut::load_saver(&mut dst), BUF)
            .await
            .unwrap();
        assert_eq!(dst, src);
        assert_eq!(
            dst.get("owner").map(|p| &p.value),
            Some(&PropertyValue::Key(Box::new(target)))
        );
    }
}
