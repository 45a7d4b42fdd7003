//! Three-tier cache: process memory, shared store, disk
//!
//! Reads probe the tiers fastest first and copy a hit into every faster
//! tier before returning. Writes go through to every enabled tier. Tier
//! failures never reach the caller: they are logged, counted and read as a
//! miss.

use super::codec::Codec;
use super::disk::DiskStore;
use super::lru_ttl::LruTtlCache;
use super::shared::{InMemorySharedStore, RedisStore, SharedStore};
use crate::config::{Capabilities, EngineConfig, SharedStoreBackend};
use crate::error::Result;
use crate::monitoring::MemoryReclaimer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache tiers, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    Memory,
    Shared,
    Disk,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheTier::Memory => "l1_memory",
            CacheTier::Shared => "l2_shared",
            CacheTier::Disk => "l3_disk",
        })
    }
}

/// Snapshot of the cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    /// Lookups no tier could answer
    pub misses: u64,
    pub promotions: u64,
    pub sets: u64,
    /// Tier read, write and decode failures
    pub errors: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Content-addressed L1/L2/L3 cache
pub struct MultiTierCache {
    l1: Option<LruTtlCache<String, Vec<u8>>>,
    l2: Option<Arc<dyn SharedStore>>,
    l3: Option<DiskStore>,
    codec: Codec,
    default_ttl: Duration,
    counters: Counters,
}

impl fmt::Debug for MultiTierCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiTierCache")
            .field("tiers", &self.tiers())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl MultiTierCache {
    pub fn builder() -> MultiTierCacheBuilder {
        MultiTierCacheBuilder::default()
    }

    /// Build the tiers the configuration and resolved capabilities allow.
    ///
    /// A disabled cache has no tiers. A shared store or disk root that fails
    /// to open is dropped with a warning.
    pub fn from_config(config: &EngineConfig, capabilities: &Capabilities) -> Self {
        let cache = &config.cache;
        let mut builder = Self::builder()
            .compression(cache.compression)
            .default_ttl(cache.default_ttl());
        if !cache.cache_enabled {
            return builder.without_memory().build_tiers(None);
        }
        builder = builder.memory(cache.l1_capacity);

        builder = match capabilities.shared_store {
            SharedStoreBackend::Redis => {
                let connected = cache
                    .redis_url
                    .as_deref()
                    .map(|url| RedisStore::connect(url, cache.redis_timeout()));
                match connected {
                    Some(Ok(store)) => builder.shared(Arc::new(store)),
                    Some(Err(e)) => {
                        warn!(error = %e, "Shared store lost since startup, using simulated store");
                        builder.shared(Arc::new(InMemorySharedStore::new()))
                    }
                    None => builder.shared(Arc::new(InMemorySharedStore::new())),
                }
            }
            SharedStoreBackend::Simulated => builder.shared(Arc::new(InMemorySharedStore::new())),
            SharedStoreBackend::Disabled => builder,
        };

        let disk = match (&cache.cache_root, capabilities.disk_store) {
            (Some(root), true) => match DiskStore::new(root) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(error = %e, root = %root.display(), "Disk tier unavailable");
                    None
                }
            },
            _ => None,
        };
        builder.build_tiers(disk)
    }

    /// Enabled tiers, fastest first
    pub fn tiers(&self) -> Vec<CacheTier> {
        let mut tiers = Vec::with_capacity(3);
        if self.l1.is_some() {
            tiers.push(CacheTier::Memory);
        }
        if self.l2.is_some() {
            tiers.push(CacheTier::Shared);
        }
        if self.l3.is_some() {
            tiers.push(CacheTier::Disk);
        }
        tiers
    }

    pub fn is_enabled(&self) -> bool {
        self.l1.is_some() || self.l2.is_some() || self.l3.is_some()
    }

    fn storage_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    fn tier_failure(&self, tier: CacheTier, op: &str, error: &dyn fmt::Display) {
        bump(&self.counters.errors);
        warn!(tier = %tier, op, error = %error, "Cache tier failure");
    }

    fn decode<T: DeserializeOwned>(&self, tier: CacheTier, bytes: &[u8]) -> Option<T> {
        match self.codec.decode(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.tier_failure(tier, "decode", &e);
                None
            }
        }
    }

    /// Look up a value, reporting which tier answered
    pub fn get_with_tier<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<(T, CacheTier)> {
        let full = Self::storage_key(namespace, key);

        if let Some(l1) = &self.l1 {
            if let Some(bytes) = l1.get(&full) {
                match self.decode(CacheTier::Memory, &bytes) {
                    Some(value) => {
                        bump(&self.counters.l1_hits);
                        return Some((value, CacheTier::Memory));
                    }
                    None => {
                        l1.remove(&full);
                    }
                }
            }
        }

        if let Some(l2) = &self.l2 {
            match l2.get(&full) {
                Ok(Some(bytes)) => {
                    if let Some(value) = self.decode(CacheTier::Shared, &bytes) {
                        bump(&self.counters.l2_hits);
                        self.promote(namespace, key, &bytes, CacheTier::Shared);
                        return Some((value, CacheTier::Shared));
                    }
                }
                Ok(None) => {}
                Err(e) => self.tier_failure(CacheTier::Shared, "get", &e),
            }
        }

        if let Some(l3) = &self.l3 {
            match l3.get(namespace, key) {
                Ok(Some(bytes)) => {
                    if let Some(value) = self.decode(CacheTier::Disk, &bytes) {
                        bump(&self.counters.l3_hits);
                        self.promote(namespace, key, &bytes, CacheTier::Disk);
                        return Some((value, CacheTier::Disk));
                    }
                }
                Ok(None) => {}
                Err(e) => self.tier_failure(CacheTier::Disk, "get", &e),
            }
        }

        bump(&self.counters.misses);
        None
    }

    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        self.get_with_tier(namespace, key).map(|(value, _)| value)
    }

    /// Copy a slower tier's hit into every faster tier
    fn promote(&self, namespace: &str, key: &str, bytes: &[u8], from: CacheTier) {
        let full = Self::storage_key(namespace, key);
        if let Some(l1) = &self.l1 {
            l1.insert(full.clone(), bytes.to_vec(), Some(self.default_ttl));
        }
        if from > CacheTier::Shared {
            if let Some(l2) = &self.l2 {
                if let Err(e) = l2.set(&full, bytes, self.default_ttl) {
                    self.tier_failure(CacheTier::Shared, "promote", &e);
                }
            }
        }
        bump(&self.counters.promotions);
        debug!(namespace, key, from = %from, "Promoted cache entry");
    }

    /// Write `value` to every tier. `ttl` defaults to the configured TTL and
    /// applies to the memory and shared tiers. Returns whether any tier
    /// accepted the write.
    pub fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.tier_failure(CacheTier::Memory, "encode", &e);
                return false;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        let full = Self::storage_key(namespace, key);
        let mut stored = false;

        if let Some(l1) = &self.l1 {
            l1.insert(full.clone(), bytes.clone(), Some(ttl));
            stored = true;
        }
        if let Some(l2) = &self.l2 {
            match l2.set(&full, &bytes, ttl) {
                Ok(()) => stored = true,
                Err(e) => self.tier_failure(CacheTier::Shared, "set", &e),
            }
        }
        if let Some(l3) = &self.l3 {
            match l3.set(namespace, key, &bytes) {
                Ok(()) => stored = true,
                Err(e) => self.tier_failure(CacheTier::Disk, "set", &e),
            }
        }
        if stored {
            bump(&self.counters.sets);
        }
        stored
    }

    /// Remove `key` from every tier; a missing key is fine
    pub fn delete(&self, namespace: &str, key: &str) {
        let full = Self::storage_key(namespace, key);
        if let Some(l1) = &self.l1 {
            l1.remove(&full);
        }
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.delete(&full) {
                self.tier_failure(CacheTier::Shared, "delete", &e);
            }
        }
        if let Some(l3) = &self.l3 {
            if let Err(e) = l3.delete(namespace, key) {
                self.tier_failure(CacheTier::Disk, "delete", &e);
            }
        }
    }

    /// Best-effort removal of a namespace from the shared and disk tiers.
    ///
    /// The memory tier keeps its entries until they expire or are evicted.
    pub fn clear_namespace(&self, namespace: &str) -> usize {
        let mut removed = 0;
        if let Some(l2) = &self.l2 {
            match l2.delete_prefix(&format!("{}:", namespace)) {
                Ok(n) => removed += n,
                Err(e) => self.tier_failure(CacheTier::Shared, "clear", &e),
            }
        }
        if let Some(l3) = &self.l3 {
            match l3.clear_namespace(namespace) {
                Ok(n) => removed += n,
                Err(e) => self.tier_failure(CacheTier::Disk, "clear", &e),
            }
        }
        info!(namespace, removed, "Cleared cache namespace");
        removed
    }

    /// Whether `tier` holds a live entry for the key, without counting a
    /// lookup or promoting
    pub fn contains_in(&self, tier: CacheTier, namespace: &str, key: &str) -> bool {
        let full = Self::storage_key(namespace, key);
        match tier {
            CacheTier::Memory => self.l1.as_ref().is_some_and(|l1| l1.contains(&full)),
            CacheTier::Shared => self
                .l2
                .as_ref()
                .is_some_and(|l2| matches!(l2.get(&full), Ok(Some(_)))),
            CacheTier::Disk => self
                .l3
                .as_ref()
                .is_some_and(|l3| matches!(l3.get(namespace, key), Ok(Some(_)))),
        }
    }

    pub fn memory_len(&self) -> usize {
        self.l1.as_ref().map_or(0, |l1| l1.len())
    }

    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let mut stats = CacheStats {
            l1_hits: load(&self.counters.l1_hits),
            l2_hits: load(&self.counters.l2_hits),
            l3_hits: load(&self.counters.l3_hits),
            misses: load(&self.counters.misses),
            promotions: load(&self.counters.promotions),
            sets: load(&self.counters.sets),
            errors: load(&self.counters.errors),
            hit_rate: 0.0,
        };
        let lookups = stats.hits() + stats.misses;
        if lookups > 0 {
            stats.hit_rate = stats.hits() as f64 / lookups as f64;
        }
        stats
    }
}

/// Chooses which tiers a [`MultiTierCache`] gets
pub struct MultiTierCacheBuilder {
    l1_capacity: Option<usize>,
    shared: Option<Arc<dyn SharedStore>>,
    disk_root: Option<PathBuf>,
    compression: bool,
    default_ttl: Duration,
}

/// Under memory pressure only the in-process tier gives memory back
impl MemoryReclaimer for MultiTierCache {
    fn reclaim(&self) -> usize {
        let freed = self.l1.as_ref().map_or(0, |l1| l1.compact());
        if freed > 0 {
            debug!(freed, "Pruned expired memory-tier entries");
        }
        freed
    }
}

impl Default for MultiTierCacheBuilder {
    fn default() -> Self {
        Self {
            l1_capacity: Some(128),
            shared: None,
            disk_root: None,
            compression: true,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl MultiTierCacheBuilder {
    pub fn memory(mut self, capacity: usize) -> Self {
        self.l1_capacity = Some(capacity);
        self
    }

    pub fn without_memory(mut self) -> Self {
        self.l1_capacity = None;
        self
    }

    pub fn shared(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(store);
        self
    }

    pub fn disk(mut self, root: impl Into<PathBuf>) -> Self {
        self.disk_root = Some(root.into());
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Fails only when the disk root cannot be created
    pub fn build(self) -> Result<MultiTierCache> {
        let disk = self.disk_root.as_ref().map(DiskStore::new).transpose()?;
        Ok(self.build_tiers(disk))
    }

    fn build_tiers(self, l3: Option<DiskStore>) -> MultiTierCache {
        MultiTierCache {
            l1: self.l1_capacity.map(LruTtlCache::new),
            l2: self.shared,
            l3,
            codec: Codec::new(self.compression),
            default_ttl: self.default_ttl,
            counters: Counters::default(),
        }
    }
}
