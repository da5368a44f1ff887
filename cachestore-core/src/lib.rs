//! cachestore core - shared data model
//!
//! Identifiers, the property representation used by the durable store,
//! the error taxonomy and configuration. This crate performs no I/O.

pub mod config;
pub mod error;
pub mod key;
pub mod property;

pub use config::{CacheStoreConfig, DEFAULT_MAX_PUT_BATCH, DEFAULT_PROPERTY_BUFFER};
pub use error::{
    CacheError, CacheStoreError, CacheStoreResult, ConfigError, MultiError, SerializationError,
    ShapeError, StoreError,
};
pub use key::{Key, KeyId};
pub use property::{Property, PropertyList, PropertyValue};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
