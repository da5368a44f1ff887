//! Durable-store identifiers.
//!
//! A [`Key`] names one entity in the durable store. Keys are either
//! complete (carrying an integer id or a string name) or incomplete, in
//! which case the store allocates an id on first write.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between path segments in an encoded key.
const PATH_SEPARATOR: char = '/';

/// Separator between kind and id inside one segment.
const SEGMENT_SEPARATOR: char = ':';

/// The identifying part of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Placeholder until the store assigns an id.
    Incomplete,
    /// Store-allocated or caller-chosen integer id.
    Int(i64),
    /// Caller-chosen string name.
    Name(String),
}

/// Identifier of an entity in the durable store.
///
/// Keys form a path: an optional parent key followed by this key's kind
/// and id. The derived ordering compares parents first, so keys sort by
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Key {
    parent: Option<Box<Key>>,
    kind: String,
    id: KeyId,
}

impl Key {
    /// Create an incomplete key. The store assigns an id when it is written.
    pub fn incomplete(kind: impl Into<String>, parent: Option<Key>) -> Self {
        Self::new(kind, KeyId::Incomplete, parent)
    }

    /// Create a complete key with an integer id.
    pub fn with_id(kind: impl Into<String>, id: i64, parent: Option<Key>) -> Self {
        Self::new(kind, KeyId::Int(id), parent)
    }

    /// Create a complete key with a string name.
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>, parent: Option<Key>) -> Self {
        Self::new(kind, KeyId::Name(name.into()), parent)
    }

    fn new(kind: impl Into<String>, id: KeyId, parent: Option<Key>) -> Self {
        Self {
            parent: parent.map(Box::new),
            kind: kind.into(),
            id,
        }
    }

    /// Entity kind this key belongs to.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// Integer id, if this key has one.
    pub fn int_id(&self) -> Option<i64> {
        match self.id {
            KeyId::Int(id) => Some(id),
            _ => None,
        }
    }

    /// String name, if this key has one.
    pub fn name(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Whether this key, or any of its ancestors, still waits for a
    /// store-assigned id.
    pub fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete || self.parent().is_some_and(Key::is_incomplete)
    }

    /// Return this key with `id` assigned. Keys that already have an id are
    /// returned unchanged.
    pub fn complete(mut self, id: i64) -> Self {
        if self.id == KeyId::Incomplete {
            self.id = KeyId::Int(id);
        }
        self
    }

    /// Encode this key as a string suitable for use as a cache key.
    ///
    /// Segments run root first, joined by `/`. Kinds and names are
    /// hex-encoded so arbitrary strings cannot collide with separators.
    /// The mapping is total and deterministic; equal keys always encode
    /// to equal strings and distinct keys to distinct strings.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.encode_into(out);
            out.push(PATH_SEPARATOR);
        }
        out.push_str(&hex::encode(self.kind.as_bytes()));
        out.push(SEGMENT_SEPARATOR);
        match &self.id {
            KeyId::Incomplete => out.push('~'),
            KeyId::Int(id) => {
                out.push('i');
                out.push_str(&id.to_string());
            }
            KeyId::Name(name) => {
                out.push('s');
                out.push_str(&hex::encode(name.as_bytes()));
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        match &self.id {
            KeyId::Incomplete => write!(f, "{},<incomplete>", self.kind),
            KeyId::Int(id) => write!(f, "{},{id}", self.kind),
            KeyId::Name(name) => write!(f, "{},{name:?}", self.kind),
        }
    }
}
