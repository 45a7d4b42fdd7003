//! Result caching
//!
//! [`MultiTierCache`] fronts three tiers:
//! - L1: bounded in-process LRU ([`LruTtlCache`])
//! - L2: a [`SharedStore`], either [`RedisStore`] or [`InMemorySharedStore`]
//! - L3: files on disk ([`DiskStore`])
//!
//! Entries are addressed by namespace and [`CacheKey`].

mod codec;
mod disk;
mod key;
mod lru_ttl;
mod multi_level;
mod shared;

pub use codec::Codec;
pub use disk::DiskStore;
pub use key::CacheKey;
pub use lru_ttl::LruTtlCache;
pub use multi_level::{CacheStats, CacheTier, MultiTierCache, MultiTierCacheBuilder};
pub use shared::{InMemorySharedStore, RedisStore, SharedStore};
