//! Error types for cachestore operations

use std::fmt;

use thiserror::Error;

use crate::Key;

/// The batch argument is not a usable record sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Invalid batch argument type {type_name}: expected a sequence of records")]
    InvalidMultiArg { type_name: &'static str },

    #[error("Key and record counts differ: {keys} keys, {records} records")]
    LengthMismatch { keys: usize, records: usize },

    #[error("No record at position {index}")]
    NilElement { index: usize },
}

/// Encoding or decoding a record failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    #[error("Field {field} has unsupported type {type_name}")]
    UnsupportedField { field: String, type_name: String },

    #[error("Cannot load field {field}: {reason}")]
    FieldMismatch { field: String, reason: String },

    #[error("Record does not serialize to a set of named fields")]
    NotAnObject,
}

/// Durable store failures other than a missing entity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Batch of {size} exceeds the store limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Store returned {got} results for {expected} keys")]
    ResultMismatch { expected: usize, got: usize },

    #[error("Invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Write aborted: an earlier window of the batch failed")]
    Aborted,

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Volatile cache failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache miss for {key}")]
    CacheMiss { key: String },

    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Per-position outcome of a batch operation.
///
/// Slot `i` describes the element at position `i` of the caller's batch;
/// `None` means that element succeeded. A batch where every element
/// succeeded never produces a `MultiError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiError(Vec<Option<CacheStoreError>>);

impl MultiError {
    /// Build from per-position results, or `None` if every position succeeded.
    pub fn from_results(errors: Vec<Option<CacheStoreError>>) -> Option<Self> {
        if errors.iter().any(Option::is_some) {
            Some(Self(errors))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Error at `index`, if that position failed.
    pub fn get(&self, index: usize) -> Option<&CacheStoreError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn is_success_at(&self, index: usize) -> bool {
        self.get(index).is_none()
    }

    /// Positions that failed, in order.
    pub fn failed_positions(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i))
            .collect()
    }

    pub fn errors(&self) -> &[Option<CacheStoreError>] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<Option<CacheStoreError>> {
        self.0
    }

    /// Unwrap a single-position result into its bare error.
    ///
    /// Returns `Err(self)` when the batch had more than one position.
    pub fn into_single(self) -> Result<Option<CacheStoreError>, Self> {
        if self.0.len() == 1 {
            Ok(self.0.into_iter().next().flatten())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failed = self.0.iter().flatten();
        match failed.next() {
            None => write!(f, "(0 errors)"),
            Some(first) => match failed.count() {
                0 => write!(f, "{first}"),
                1 => write!(f, "{first} (and 1 other error)"),
                n => write!(f, "{first} (and {n} other errors)"),
            },
        }
    }
}

impl std::error::Error for MultiError {}

/// Master error type for all cachestore errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("No such entity: {key}")]
    NoSuchEntity { key: Key },

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Multi(#[from] MultiError),
}

impl CacheStoreError {
    pub fn no_such_entity(key: &Key) -> Self {
        CacheStoreError::NoSuchEntity { key: key.clone() }
    }

    pub fn is_no_such_entity(&self) -> bool {
        matches!(self, CacheStoreError::NoSuchEntity { .. })
    }

    pub fn is_cache_miss(&self) -> bool {
        matches!(self, CacheStoreError::Cache(CacheError::CacheMiss { .. }))
    }

    /// Collapse a one-element `Multi` into its bare per-position error.
    ///
    /// Any other error is returned unchanged.
    pub fn into_single_error(self) -> CacheStoreError {
        match self {
            CacheStoreError::Multi(multi) => match multi.into_single() {
                Ok(Some(e)) => e,
                Ok(None) => CacheStoreError::Multi(MultiError(vec![None])),
                Err(multi) => CacheStoreError::Multi(multi),
            },
            other => other,
        }
    }
}

/// Result type alias for cachestore operations.
pub type CacheStoreResult<T> = Result<T, CacheStoreError>;

// =============================================================================
// TESTS
// =============================================================================
