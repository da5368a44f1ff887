//! Generic property representation of an entity.
//!
//! The durable store persists entities as ordered lists of named values.
//! Custom-serializable records stream themselves to and from this form.

use serde::{Deserialize, Serialize};

use crate::{Key, Timestamp};

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Int(i64),
    Bool(bool),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(Timestamp),
    /// Reference to another entity.
    Key(Box<Key>),
}

impl PropertyValue {
    /// Short name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Int(_) => "int",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::Bytes(_) => "bytes",
            PropertyValue::Time(_) => "time",
            PropertyValue::Key(_) => "key",
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        PropertyValue::Bytes(v)
    }
}

impl From<Timestamp> for PropertyValue {
    fn from(v: Timestamp) -> Self {
        PropertyValue::Time(v)
    }
}

impl From<Key> for PropertyValue {
    fn from(v: Key) -> Self {
        PropertyValue::Key(Box::new(v))
    }
}

/// A named property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
    /// Whether this is one of several values sharing `name`.
    pub multiple: bool,
    /// Whether the store should skip indexing this value.
    pub no_index: bool,
}

impl Property {
    /// Create a single-valued, indexed property.
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            multiple: false,
            no_index: false,
        }
    }

    /// Create one value of a multi-valued property.
    pub fn multiple(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            multiple: true,
            ..Self::new(name, value)
        }
    }

    pub fn with_no_index(mut self) -> Self {
        self.no_index = true;
        self
    }
}

/// The store's own generic entity representation: an ordered property list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyList(pub Vec<Property>);

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, property: Property) {
        self.0.push(property);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.0.iter()
    }

    /// First property named `name`.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.iter().find(|p| p.name == name)
    }
}

impl From<Vec<Property>> for PropertyList {
    fn from(properties: Vec<Property>) -> Self {
        Self(properties)
    }
}

impl FromIterator<Property> for PropertyList {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyList {
    type Item = Property;
    type IntoIter = std::vec::IntoIter<Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
