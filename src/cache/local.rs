//! L1 Cache - Bounded In-Process Cache
//!
//! Per-process cache sitting in front of the networked store.
//!
//! # Design
//!
//! - `DashMap` table: all single-key operations are safe from any thread
//!   without external locking
//! - Entry-count bound enforced on insertion through an [`EvictionPolicy`]
//! - Optional expire-after-write: expired entries read as absent even before
//!   they are physically removed
//! - Pure cache, not a loading cache: a miss never populates the table
//!
//! Eviction scans the table for the lowest-ranked entry. Expired entries are
//! always chosen before live ones; among live entries the policy rank decides,
//! and the insertion sequence breaks ties. The entry being inserted is never
//! its own victim.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entry::CacheEntry;
use super::eviction::{EvictionPolicy, EvictionPolicyKind, EvictionRank};
use super::stats::{CacheStats, StatsCounter};
use super::DEFAULT_L1_MAX_SIZE;
use crate::error::{Error, Result};

/// L1 cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalCacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// Entries older than this read as absent
    #[serde(with = "super::duration_secs_opt")]
    pub expire_after_write: Option<Duration>,
    /// Record hit/miss/load/eviction counters
    pub record_stats: bool,
    /// Victim selection when the bound is exceeded
    pub eviction: EvictionPolicyKind,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_L1_MAX_SIZE,
            expire_after_write: None,
            record_stats: true,
            eviction: EvictionPolicyKind::default(),
        }
    }
}

impl LocalCacheConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("L1 max_size must be at least 1".into()));
        }
        if self.expire_after_write == Some(Duration::ZERO) {
            return Err(Error::Config(
                "L1 expire_after_write must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Priority used during the victim scan: expired entries first, then rank,
/// then insertion order.
type VictimPriority = (bool, EvictionRank, u64);

/// L1 Cache - bounded in-memory cache
pub struct LocalCache<K, V> {
    name: String,
    storage: DashMap<K, CacheEntry<V>>,
    config: LocalCacheConfig,
    policy: Arc<dyn EvictionPolicy>,
    /// Logical clock for recency and insertion order
    clock: AtomicU64,
    stats: StatsCounter,
    /// Serializes victim scans so concurrent inserts do not over-evict
    eviction_lock: Mutex<()>,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new L1 cache using the configured built-in policy
    pub fn new(name: impl Into<String>, config: LocalCacheConfig) -> Result<Self> {
        let policy = config.eviction.build();
        Self::with_policy(name, config, policy)
    }

    /// Create a new L1 cache with a custom eviction policy
    pub fn with_policy(
        name: impl Into<String>,
        config: LocalCacheConfig,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            storage: DashMap::new(),
            stats: StatsCounter::new(config.record_stats),
            config,
            policy,
            clock: AtomicU64::new(0),
            eviction_lock: Mutex::new(()),
        })
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a value, recording a hit or miss
    pub fn get(&self, key: &K) -> Option<V> {
        let tick = self.tick();

        let expired = match self.storage.get(key) {
            Some(entry) if !entry.is_expired() => {
                entry.metadata.record_access(tick);
                self.stats.record_hit();
                return Some(entry.value().value().clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired && self
            .storage
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            self.stats.record_evictions(1);
        }
        self.stats.record_miss();
        None
    }

    /// Insert or replace a value, evicting if the bound is exceeded
    pub fn put(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, self.tick(), self.config.expire_after_write);
        let protect = key.clone();
        self.storage.insert(key, entry);

        if self.storage.len() > self.config.max_size {
            self.enforce_bound(&protect);
        }
    }

    /// Remove a single entry; returns whether it was present
    pub fn invalidate(&self, key: &K) -> bool {
        self.storage.remove(key).is_some()
    }

    /// Remove a batch of entries; returns how many were present
    pub fn invalidate_many<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        keys.into_iter().filter(|k| self.invalidate(k)).count()
    }

    /// Remove every entry
    pub fn invalidate_all(&self) {
        self.storage.clear();
    }

    /// Check for a live entry without touching statistics or recency
    pub fn contains(&self, key: &K) -> bool {
        self.storage
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Count a population from the networked tier
    pub fn record_load(&self) {
        self.stats.record_load();
    }

    /// Physically remove expired entries; returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        if self.config.expire_after_write.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut removed = 0usize;
        self.storage.retain(|_, entry| {
            let keep = !entry.metadata.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.stats.record_evictions(removed as u64);
        removed
    }

    /// Snapshot of the keys currently held (expired entries included)
    pub fn keys(&self) -> Vec<K> {
        self.storage.iter().map(|item| item.key().clone()).collect()
    }

    /// Evict until the table is back within its bound
    fn enforce_bound(&self, protect: &K) {
        let _guard = self.eviction_lock.lock();
        let mut evicted = 0u64;

        while self.storage.len() > self.config.max_size {
            let Some(victim) = self.choose_victim(protect) else {
                break;
            };
            if self.storage.remove(&victim).is_some() {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted);
            debug!(
                cache = %self.name,
                policy = self.policy.name(),
                evicted,
                "evicted L1 entries"
            );
        }
    }

    fn choose_victim(&self, protect: &K) -> Option<K> {
        let now = Instant::now();
        let mut best: Option<(VictimPriority, K)> = None;

        for item in self.storage.iter() {
            if item.key() == protect {
                continue;
            }
            let meta = &item.value().metadata;
            let priority = (
                !meta.is_expired_at(now),
                self.policy.rank(meta),
                meta.sequence(),
            );
            if best.as_ref().map_or(true, |(current, _)| priority < *current) {
                best = Some((priority, item.key().clone()));
            }
        }

        best.map(|(_, key)| key)
    }
}

impl<K: Eq + Hash, V> LocalCache<K, V> {
    /// Cache name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries physically held (may include expired entries)
    pub fn size(&self) -> usize {
        self.storage.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Configured entry bound
    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Configured expire-after-write
    pub fn expire_after_write(&self) -> Option<Duration> {
        self.config.expire_after_write
    }

    /// Eviction policy name
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl<K: Eq + Hash, V> std::fmt::Debug for LocalCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("name", &self.name)
            .field("size", &self.storage.len())
            .field("max_size", &self.config.max_size)
            .field("policy", &self.policy.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
