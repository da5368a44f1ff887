//! Configuration types

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Largest batch the store accepts in one write, unless it says otherwise.
pub const DEFAULT_MAX_PUT_BATCH: usize = 100;

/// Capacity of the property channel used when streaming custom records.
pub const DEFAULT_PROPERTY_BUFFER: usize = 32;

/// Configuration for a cache-aside store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStoreConfig {
    /// Emit debug events describing which tier served each call.
    pub debug: bool,
    /// Upper bound on keys per durable-store write.
    pub max_put_batch: usize,
    /// Bounded channel capacity for property streaming.
    pub property_buffer: usize,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_put_batch: DEFAULT_MAX_PUT_BATCH,
            property_buffer: DEFAULT_PROPERTY_BUFFER,
        }
    }
}

impl CacheStoreConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable debug events.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the maximum number of keys per store write.
    pub fn with_max_put_batch(mut self, max: usize) -> Self {
        self.max_put_batch = max;
        self
    }

    /// Set the property channel capacity.
    pub fn with_property_buffer(mut self, capacity: usize) -> Self {
        self.property_buffer = capacity;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_put_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_put_batch".to_string(),
                value: self.max_put_batch.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        // tokio's bounded channels reject a capacity of zero
        if self.property_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "property_buffer".to_string(),
                value: self.property_buffer.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
