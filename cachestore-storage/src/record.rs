//! Record capabilities.
//!
//! A record reaches the cache and the store in one of two ways:
//!
//! - A plain record ([`Entity`]) is any serde type. The store sees its
//!   fields as properties, and the cache holds the whole value as one
//!   binary payload.
//! - A custom-serializable record ([`PropertyLoadSaver`]) streams its own
//!   ordered properties through a bounded channel, and reads them back
//!   the same way.
//!
//! [`RecordRef`] and [`RecordMut`] are the per-element views the codec
//! works with. The variant is picked once, where the batch is built, so
//! nothing downstream inspects types.

use std::any::Any;
use std::collections::BTreeMap;

use async_trait::async_trait;
use cachestore_core::{
    CacheStoreResult, Key, Property, PropertyList, PropertyValue, SerializationError,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use tokio::sync::mpsc;

use crate::cache::codec::{bincode_deserialize, bincode_serialize};

/// Sending half of a property stream.
pub type PropertySender = mpsc::Sender<Property>;

/// Receiving half of a property stream.
pub type PropertyReceiver = mpsc::Receiver<Property>;

/// Send one property, failing if the consumer has gone away.
pub async fn send_property(tx: &PropertySender, property: Property) -> CacheStoreResult<()> {
    tx.send(property).await.map_err(|e| {
        SerializationError::Encode {
            reason: format!("property stream closed before {} was sent", e.0.name),
        }
        .into()
    })
}

/// A record that streams itself as an ordered list of properties.
///
/// `save` must send every property and then drop the sender. `load`
/// receives properties until the stream ends.
#[async_trait]
pub trait PropertyLoadSaver: Send + Sync {
    async fn load(&mut self, properties: PropertyReceiver) -> CacheStoreResult<()>;

    async fn save(&self, properties: PropertySender) -> CacheStoreResult<()>;
}

#[async_trait]
impl PropertyLoadSaver for PropertyList {
    async fn load(&mut self, mut properties: PropertyReceiver) -> CacheStoreResult<()> {
        self.0.clear();
        while let Some(property) = properties.recv().await {
            self.0.push(property);
        }
        Ok(())
    }

    async fn save(&self, properties: PropertySender) -> CacheStoreResult<()> {
        for property in self.iter() {
            send_property(&properties, property.clone()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: PropertyLoadSaver + ?Sized> PropertyLoadSaver for Box<P> {
    async fn load(&mut self, properties: PropertyReceiver) -> CacheStoreResult<()> {
        (**self).load(properties).await
    }

    async fn save(&self, properties: PropertySender) -> CacheStoreResult<()> {
        (**self).save(properties).await
    }
}

/// Marker for plain records: serde types stored field by field.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct Note { title: String, stars: i64 }
/// impl Entity for Note {}
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Object-safe view of an [`Entity`].
pub trait PlainRecord: Send + Sync {
    /// Whole-value binary payload.
    fn to_payload(&self) -> Result<Vec<u8>, SerializationError>;

    /// Replace this value with one decoded from a payload.
    fn from_payload(&mut self, bytes: &[u8]) -> Result<(), SerializationError>;

    /// Fields as store properties.
    fn to_properties(&self) -> Result<PropertyList, SerializationError>;

    /// Load fields from store properties. Fields without a property keep
    /// their current value.
    fn from_properties(&mut self, properties: PropertyList) -> Result<(), SerializationError>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> PlainRecord for T {
    fn to_payload(&self) -> Result<Vec<u8>, SerializationError> {
        bincode_serialize(self)
    }

    fn from_payload(&mut self, bytes: &[u8]) -> Result<(), SerializationError> {
        *self = bincode_deserialize(bytes)?;
        Ok(())
    }

    fn to_properties(&self) -> Result<PropertyList, SerializationError> {
        save_struct(self)
    }

    fn from_properties(&mut self, properties: PropertyList) -> Result<(), SerializationError> {
        load_struct(self, properties)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A [`PropertyLoadSaver`] that can be downcast.
pub trait AnyLoadSaver: PropertyLoadSaver {
    fn as_load_saver(&self) -> &dyn PropertyLoadSaver;

    fn as_load_saver_mut(&mut self) -> &mut dyn PropertyLoadSaver;

    fn as_any(&self) -> &dyn Any;
}

impl<P: PropertyLoadSaver + 'static> AnyLoadSaver for P {
    fn as_load_saver(&self) -> &dyn PropertyLoadSaver {
        self
    }

    fn as_load_saver_mut(&mut self) -> &mut dyn PropertyLoadSaver {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared view of one record.
#[derive(Clone, Copy)]
pub enum RecordRef<'a> {
    Struct(&'a dyn PlainRecord),
    LoadSaver(&'a dyn PropertyLoadSaver),
}

impl<'a> RecordRef<'a> {
    pub fn entity<T: Entity>(record: &'a T) -> Self {
        RecordRef::Struct(record)
    }

    pub fn load_saver<P: PropertyLoadSaver>(record: &'a P) -> Self {
        RecordRef::LoadSaver(record)
    }
}

/// Exclusive view of one record, used as a load destination.
pub enum RecordMut<'a> {
    Struct(&'a mut dyn PlainRecord),
    LoadSaver(&'a mut dyn PropertyLoadSaver),
}

impl<'a> RecordMut<'a> {
    pub fn entity<T: Entity>(record: &'a mut T) -> Self {
        RecordMut::Struct(record)
    }

    pub fn load_saver<P: PropertyLoadSaver>(record: &'a mut P) -> Self {
        RecordMut::LoadSaver(record)
    }

    pub fn as_ref(&self) -> RecordRef<'_> {
        match self {
            RecordMut::Struct(r) => RecordRef::Struct(&**r),
            RecordMut::LoadSaver(r) => RecordRef::LoadSaver(&**r),
        }
    }

    pub fn reborrow(&mut self) -> RecordMut<'_> {
        match self {
            RecordMut::Struct(r) => RecordMut::Struct(&mut **r),
            RecordMut::LoadSaver(r) => RecordMut::LoadSaver(&mut **r),
        }
    }
}

/// A heterogeneous batch element. Each element carries its own capability.
pub enum DynRecord {
    Struct(Box<dyn PlainRecord>),
    LoadSaver(Box<dyn AnyLoadSaver>),
}

impl DynRecord {
    pub fn entity<T: Entity>(record: T) -> Self {
        DynRecord::Struct(Box::new(record))
    }

    pub fn load_saver<P: PropertyLoadSaver + 'static>(record: P) -> Self {
        DynRecord::LoadSaver(Box::new(record))
    }

    pub fn as_record(&self) -> RecordRef<'_> {
        match self {
            DynRecord::Struct(r) => RecordRef::Struct(&**r),
            DynRecord::LoadSaver(r) => RecordRef::LoadSaver((**r).as_load_saver()),
        }
    }

    pub fn as_record_mut(&mut self) -> RecordMut<'_> {
        match self {
            DynRecord::Struct(r) => RecordMut::Struct(&mut **r),
            DynRecord::LoadSaver(r) => RecordMut::LoadSaver((**r).as_load_saver_mut()),
        }
    }

    // Deref explicitly: the box itself is also a load saver.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            DynRecord::Struct(r) => (**r).as_any().downcast_ref(),
            DynRecord::LoadSaver(r) => (**r).as_any().downcast_ref(),
        }
    }
}

// ============================================================================
// STRUCT <-> PROPERTIES
// ============================================================================

/// Convert a serde struct into store properties.
///
/// Scalar fields become single properties and arrays of scalars become
/// multi-valued properties. [`Key`] fields become key properties. Other
/// nested objects, nested arrays and unsigned integers past `i64::MAX` are
/// rejected.
pub fn save_struct<T: Serialize + ?Sized>(src: &T) -> Result<PropertyList, SerializationError> {
    let value = serde_json::to_value(src).map_err(|e| SerializationError::Encode {
        reason: e.to_string(),
    })?;
    let Value::Object(fields) = value else {
        return Err(SerializationError::NotAnObject);
    };

    let mut properties = PropertyList::new();
    for (name, field) in fields {
        match field {
            Value::Array(items) => {
                for item in items {
                    let value = json_to_scalar(&name, item)?;
                    properties.push(Property::multiple(name.clone(), value));
                }
            }
            other => {
                let value = json_to_scalar(&name, other)?;
                properties.push(Property::new(name, value));
            }
        }
    }
    Ok(properties)
}

/// Load store properties into a serde struct.
///
/// Fields with no matching property keep their current value, except
/// multi-valued fields, which become empty. A property naming a field the
/// struct does not have is a [`SerializationError::FieldMismatch`].
pub fn load_struct<T: Serialize + DeserializeOwned>(
    dst: &mut T,
    properties: PropertyList,
) -> Result<(), SerializationError> {
    let current = serde_json::to_value(&*dst).map_err(|e| SerializationError::Decode {
        reason: e.to_string(),
    })?;
    let Value::Object(mut fields) = current else {
        return Err(SerializationError::NotAnObject);
    };

    for field in fields.values_mut() {
        if let Value::Array(items) = field {
            items.clear();
        }
    }

    let mut singles: Map<String, Value> = Map::new();
    let mut multiples: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for property in properties {
        if !fields.contains_key(&property.name) {
            return Err(SerializationError::FieldMismatch {
                field: property.name,
                reason: "no such field".to_string(),
            });
        }
        let value = scalar_to_json(&property.name, property.value)?;
        if property.multiple {
            multiples.entry(property.name).or_default().push(value);
        } else {
            singles.insert(property.name, value);
        }
    }
    fields.extend(singles);
    fields.extend(
        multiples
            .into_iter()
            .map(|(name, items)| (name, Value::Array(items))),
    );

    *dst = serde_json::from_value(Value::Object(fields)).map_err(|e| {
        SerializationError::FieldMismatch {
            field: "<struct>".to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(())
}

fn json_to_scalar(field: &str, value: Value) -> Result<PropertyValue, SerializationError> {
    match value {
        Value::Null => Ok(PropertyValue::Null),
        Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(PropertyValue::Int(i)),
            // Would load back as a float.
            None if n.is_u64() => Err(SerializationError::UnsupportedField {
                field: field.to_string(),
                type_name: "u64 above i64::MAX".to_string(),
            }),
            None => n
                .as_f64()
                .map(PropertyValue::Float)
                .ok_or_else(|| SerializationError::UnsupportedField {
                    field: field.to_string(),
                    type_name: "number".to_string(),
                }),
        },
        Value::String(s) => Ok(PropertyValue::String(s)),
        Value::Array(_) => Err(SerializationError::UnsupportedField {
            field: field.to_string(),
            type_name: "nested array".to_string(),
        }),
        // The only object a property can hold is a key.
        Value::Object(fields) => serde_json::from_value::<Key>(Value::Object(fields))
            .map(PropertyValue::from)
            .map_err(|_| SerializationError::UnsupportedField {
                field: field.to_string(),
                type_name: "object".to_string(),
            }),
    }
}

fn scalar_to_json(field: &str, value: PropertyValue) -> Result<Value, SerializationError> {
    Ok(match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Int(i) => Value::Number(i.into()),
        PropertyValue::Bool(b) => Value::Bool(b),
        PropertyValue::Float(f) => {
            Value::Number(Number::from_f64(f).ok_or_else(|| SerializationError::FieldMismatch {
                field: field.to_string(),
                reason: format!("{f} is not representable"),
            })?)
        }
        PropertyValue::String(s) => Value::String(s),
        PropertyValue::Bytes(bytes) => {
            Value::Array(bytes.into_iter().map(|b| Value::Number(b.into())).collect())
        }
        PropertyValue::Time(t) => Value::String(t.to_rfc3339()),
        PropertyValue::Key(key) => {
            serde_json::to_value(&*key).map_err(|e| SerializationError::FieldMismatch {
                field: field.to_string(),
                reason: e.to_string(),
            })?
        }
    })
}
