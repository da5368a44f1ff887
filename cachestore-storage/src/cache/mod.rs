//! Cache-aside layer between a durable store and a volatile cache.
//!
//! Reads are served from the cache when every requested key is present
//! and from the durable store otherwise, repopulating the cache on the
//! way out. Writes go to the durable store first and are then cached.
//! Deletes clear both tiers.
//!
//! # Failure Policy
//!
//! The durable store is authoritative. A cache failure never fails a call
//! whose store work succeeded: it is logged, counted in
//! [`CacheStoreStats::cache_errors`], and the call carries on. Store
//! failures are returned as they are.
//!
//! Batch calls report per-key failures as a [`MultiError`] aligned to the
//! caller's key order. A batch of one reports its single error bare.
//!
//! # Example
//!
//! ```ignore
//! let store = CacheStore::with_defaults(datastore, memcache);
//!
//! let keys = store
//!     .put_multi(&[Key::incomplete("Note", None)], &Structs(vec![note]))
//!     .await?;
//!
//! let mut dst = Structs(vec![Note::default()]);
//! store.get_multi(&keys, &mut dst).await?;
//! ```
//!
//! [`MultiError`]: cachestore_core::MultiError

pub mod batch;
pub mod cache_aside;
pub mod cache_key;
pub mod codec;
pub mod memory_backend;
pub mod multi_arg;
pub mod traits;

pub use batch::split_put;
pub use cache_aside::CacheStore;
pub use cache_key::encode_keys;
pub use codec::{decode, decode_items, encode, encode_items, load_entity, save_entity};
pub use memory_backend::MockMemcache;
pub use multi_arg::{
    check_lengths, check_multi_arg, check_no_nil, Interfaces, LoadSavers, MultiArg, MultiArgType,
    StructPtrs, Structs,
};
pub use traits::{CacheStoreStats, Item, Memcache};
