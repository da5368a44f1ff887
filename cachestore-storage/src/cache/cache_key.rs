//! Durable-store keys to cache keys.
//!
//! The mapping is one way. Cache keys are never parsed back; lookups join
//! results to keys by re-encoding.

use cachestore_core::Key;

/// Encode each key to its cache key, position for position.
pub fn encode_keys(keys: &[Key]) -> Vec<String> {
    keys.iter().map(Key::encode).collect()
}
