//! Cache regions.
//!
//! A region hands out named L1 caches built from shared defaults, owns them
//! for their whole lifetime and clears or sweeps them as a unit. Caches in one
//! region may have different key and value types; asking for an existing name
//! with other types is an error rather than a silent second cache.

use std::any::Any;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::local::{LocalCache, LocalCacheConfig};
use super::stats::CacheStats;
use crate::error::{Error, Result};

/// Shortest sweep period accepted by the janitor
const MIN_JANITOR_PERIOD: Duration = Duration::from_millis(1);

/// Type-erased view of a region cache
trait RegionMember: Send + Sync {
    fn invalidate_all(&self);
    fn stats(&self) -> CacheStats;
    fn size(&self) -> usize;
    fn purge_expired(&self) -> usize;
}

impl<K, V> RegionMember for LocalCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn invalidate_all(&self) {
        LocalCache::invalidate_all(self)
    }

    fn stats(&self) -> CacheStats {
        LocalCache::stats(self)
    }

    fn size(&self) -> usize {
        LocalCache::size(self)
    }

    fn purge_expired(&self) -> usize {
        LocalCache::purge_expired(self)
    }
}

#[derive(Clone)]
struct RegionSlot {
    typed: Arc<dyn Any + Send + Sync>,
    member: Arc<dyn RegionMember>,
}

/// Named group of L1 caches sharing defaults
pub struct CacheRegion {
    name: String,
    defaults: LocalCacheConfig,
    caches: DashMap<String, RegionSlot>,
}

impl CacheRegion {
    /// Create an empty region
    pub fn new(name: impl Into<String>, defaults: LocalCacheConfig) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config("region name must not be empty".into()));
        }
        defaults
            .validate()
            .map_err(|e| Error::Config(format!("region '{}': {}", name, e)))?;

        Ok(Self {
            name,
            defaults,
            caches: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &LocalCacheConfig {
        &self.defaults
    }

    /// Get or lazily create a cache using the region defaults
    pub fn cache<K, V>(&self, name: &str) -> Result<Arc<LocalCache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.cache_with(name, self.defaults.clone())
    }

    /// Get or lazily create a cache; `config` only applies on creation
    pub fn cache_with<K, V>(&self, name: &str, config: LocalCacheConfig) -> Result<Arc<LocalCache<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let slot = match self.caches.entry(name.to_string()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let cache = Arc::new(LocalCache::<K, V>::new(name, config)?);
                let slot = RegionSlot {
                    typed: cache.clone(),
                    member: cache,
                };
                vacant.insert(slot.clone());
                debug!(region = %self.name, cache = %name, "created region cache");
                slot
            }
        };

        slot.typed
            .downcast::<LocalCache<K, V>>()
            .map_err(|_| Error::RegionTypeMismatch {
                region: self.name.clone(),
                cache: name.to_string(),
            })
    }

    /// Whether a cache with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Names of all caches, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|slot| slot.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of caches
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Entries held across every cache
    pub fn total_entries(&self) -> usize {
        self.caches.iter().map(|slot| slot.member.size()).sum()
    }

    /// Statistics of one cache
    pub fn cache_stats(&self, name: &str) -> Option<CacheStats> {
        self.caches.get(name).map(|slot| slot.member.stats())
    }

    /// Statistics merged across every cache
    pub fn stats(&self) -> CacheStats {
        self.caches.iter().map(|slot| slot.member.stats()).sum()
    }

    /// Clear every cache in the region
    pub fn invalidate_all(&self) {
        for slot in self.caches.iter() {
            slot.member.invalidate_all();
        }
        info!(region = %self.name, caches = self.caches.len(), "invalidated region");
    }

    /// Sweep expired entries from every cache
    pub fn purge_expired(&self) -> usize {
        self.caches
            .iter()
            .map(|slot| slot.member.purge_expired())
            .sum()
    }

    /// Periodically sweep expired entries until `cancel` fires or the region
    /// is dropped
    pub fn spawn_janitor(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let region: Weak<Self> = Arc::downgrade(self);
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(MIN_JANITOR_PERIOD));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(region) = region.upgrade() else {
                            break;
                        };
                        let purged = region.purge_expired();
                        if purged > 0 {
                            debug!(region = %name, purged, "purged expired entries");
                        }
                    }
                }
            }
            debug!(region = %name, "janitor stopped");
        })
    }
}

impl std::fmt::Debug for CacheRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegion")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .field("caches", &self.cache_names())
            .finish()
    }
}
