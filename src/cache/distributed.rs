//! Distributed Cache - Two-Tier Coordinator
//!
//! Unifies a bounded in-process L1 with a networked L2 store behind one
//! get/put/invalidate API.
//!
//! # Read path
//!
//! ```text
//! get(k) ──► L1 hit? ──yes──► return
//!              │ no
//!              ▼
//!          L2 GET "<name>:<mapped k>" ──miss──► None
//!              │ hit
//!              ▼
//!          decode ─► populate L1 ─► return
//! ```
//!
//! # Write path
//!
//! 1. Optional conflict resolution against the current value; `None` suppresses
//!    the write entirely.
//! 2. L1 updated unconditionally.
//! 3. L2 written with the configured TTL, awaited (synchronous) or on a tracked
//!    background task (asynchronous, failures logged only).
//!
//! Cross-tier sequences are not atomic. Two concurrent writers on one key may
//! both resolve against the same existing value; the last write to land wins.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::codec::{KeyCodec, ValueCodec};
use super::invalidation::{BusStats, InvalidationBus, InvalidationScope, DEFAULT_INVALIDATION_CHANNEL};
use super::key::{namespace_pattern, namespaced, KEY_SEPARATOR};
use super::local::{LocalCache, LocalCacheConfig};
use super::policy::{ConflictResolver, SyncStrategy};
use super::stats::CacheStats;
use crate::error::{Error, Result};
use crate::store::{NetworkedStore, Subscription};

/// Maps a typed key to the string stored under the cache namespace
pub type KeyMapper<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Key mapper using the key's `Display` form
pub fn display_key_mapper<K: fmt::Display>() -> KeyMapper<K> {
    Arc::new(|key: &K| key.to_string())
}

// =============================================================================
// Configuration
// =============================================================================

/// Invalidation bus settings for one cache
#[derive(Clone)]
pub struct InvalidationConfig<K> {
    /// Pub/sub channel shared by all peers
    pub channel: String,
    /// Identifier of this process, stamped on every published message
    pub server_id: String,
    /// Reversible key encoding carried in messages
    pub key_codec: Arc<dyn KeyCodec<K>>,
    /// Skip messages this process published
    pub ignore_own_messages: bool,
}

impl<K> InvalidationConfig<K> {
    /// Settings on the default channel
    pub fn new(server_id: impl Into<String>, key_codec: Arc<dyn KeyCodec<K>>) -> Self {
        Self {
            channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            server_id: server_id.into(),
            key_codec,
            ignore_own_messages: true,
        }
    }

    /// Use a different channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// Where the L1 tier comes from
pub enum LocalTier<K, V> {
    /// No L1: every read goes to the store
    Disabled,
    /// Build a private L1 from this configuration
    Owned(LocalCacheConfig),
    /// Use an L1 owned elsewhere, typically by a [`CacheRegion`](super::CacheRegion)
    Shared(Arc<LocalCache<K, V>>),
}

impl<K, V> Default for LocalTier<K, V> {
    fn default() -> Self {
        LocalTier::Owned(LocalCacheConfig::default())
    }
}

/// Explicit construction parameters for a [`DistributedCache`].
///
/// Assembled once and validated eagerly by [`DistributedCache::new`].
pub struct DistributedCacheConfig<K, V> {
    /// Cache name; also the L2 key namespace and invalidation region
    pub name: String,
    pub store: Arc<dyn NetworkedStore>,
    pub codec: Arc<dyn ValueCodec<V>>,
    pub key_mapper: KeyMapper<K>,
    /// L2 entry lifetime; `None` stores without expiry
    pub ttl: Option<Duration>,
    pub sync_strategy: SyncStrategy,
    pub conflict_resolver: Option<Arc<dyn ConflictResolver<V>>>,
    pub local: LocalTier<K, V>,
    pub invalidation: Option<InvalidationConfig<K>>,
}

impl<K, V> DistributedCacheConfig<K, V> {
    /// Configuration with defaults: no TTL, synchronous writes, no resolver,
    /// a default-sized private L1 and no invalidation bus
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn NetworkedStore>,
        codec: Arc<dyn ValueCodec<V>>,
        key_mapper: KeyMapper<K>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            codec,
            key_mapper,
            ttl: None,
            sync_strategy: SyncStrategy::default(),
            conflict_resolver: None,
            local: LocalTier::default(),
            invalidation: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_sync_strategy(mut self, sync_strategy: SyncStrategy) -> Self {
        self.sync_strategy = sync_strategy;
        self
    }

    pub fn with_conflict_resolver(mut self, resolver: Arc<dyn ConflictResolver<V>>) -> Self {
        self.conflict_resolver = Some(resolver);
        self
    }

    pub fn with_local(mut self, local: LocalTier<K, V>) -> Self {
        self.local = local;
        self
    }

    pub fn with_invalidation(mut self, invalidation: InvalidationConfig<K>) -> Self {
        self.invalidation = Some(invalidation);
        self
    }

    /// Check every field; runs before any instance is usable
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("cache name must not be empty".into()));
        }
        if let Some(c) = self
            .name
            .chars()
            .find(|&c| {
                c.is_whitespace() || c == KEY_SEPARATOR || matches!(c, '*' | '?' | '[' | ']' | '\\')
            })
        {
            return Err(Error::Config(format!(
                "cache name '{}' contains invalid character {:?}",
                self.name, c
            )));
        }
        if self.ttl == Some(Duration::ZERO) {
            return Err(Error::Config(format!(
                "cache '{}': ttl must be greater than zero",
                self.name
            )));
        }
        if let LocalTier::Owned(local) = &self.local {
            local
                .validate()
                .map_err(|e| Error::Config(format!("cache '{}': {}", self.name, e)))?;
        }
        if let Some(invalidation) = &self.invalidation {
            if invalidation.channel.is_empty() {
                return Err(Error::Config(format!(
                    "cache '{}': invalidation channel must not be empty",
                    self.name
                )));
            }
            if invalidation.server_id.is_empty() {
                return Err(Error::Config(format!(
                    "cache '{}': server id must not be empty",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Distributed Cache
// =============================================================================

/// Two-tier cache coordinator
pub struct DistributedCache<K, V> {
    name: String,
    store: Arc<dyn NetworkedStore>,
    codec: Arc<dyn ValueCodec<V>>,
    key_mapper: KeyMapper<K>,
    ttl: Option<Duration>,
    sync_strategy: SyncStrategy,
    resolver: Option<Arc<dyn ConflictResolver<V>>>,
    local: Option<Arc<LocalCache<K, V>>>,
    bus: Option<InvalidationBus>,
    key_codec: Option<Arc<dyn KeyCodec<K>>>,
    subscription: Mutex<Option<Subscription>>,
    /// Outstanding asynchronous L2 writes
    writes: TaskTracker,
    write_failures: Arc<AtomicU64>,
}

impl<K, V> DistributedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Validate the configuration, build the L1 and attach to the bus.
    ///
    /// A bus subscription failure is logged and the cache still starts:
    /// invalidation is best-effort and L2 TTLs bound staleness.
    pub async fn new(config: DistributedCacheConfig<K, V>) -> Result<Self> {
        config.validate()?;

        let DistributedCacheConfig {
            name,
            store,
            codec,
            key_mapper,
            ttl,
            sync_strategy,
            conflict_resolver,
            local,
            invalidation,
        } = config;

        let local = match local {
            LocalTier::Disabled => None,
            LocalTier::Owned(local_config) => Some(Arc::new(LocalCache::new(name.clone(), local_config)?)),
            LocalTier::Shared(local) => Some(local),
        };

        let (bus, key_codec) = match invalidation {
            Some(invalidation) => {
                let bus = InvalidationBus::new(
                    Arc::clone(&store),
                    invalidation.channel,
                    name.clone(),
                    invalidation.server_id,
                    invalidation.ignore_own_messages,
                );
                (Some(bus), Some(invalidation.key_codec))
            }
            None => (None, None),
        };

        let subscription = match (&bus, &key_codec, &local) {
            (Some(bus), Some(key_codec), Some(local)) => {
                let handler = eviction_handler(name.clone(), Arc::clone(local), Arc::clone(key_codec));
                match bus.subscribe(handler).await {
                    Ok(subscription) => Some(subscription),
                    Err(e) => {
                        warn!(cache = %name, error = %e, "invalidation subscribe failed, continuing without it");
                        None
                    }
                }
            }
            _ => None,
        };

        info!(
            cache = %name,
            sync = %sync_strategy,
            l1 = local.is_some(),
            bus = bus.is_some(),
            "distributed cache ready"
        );

        Ok(Self {
            name,
            store,
            codec,
            key_mapper,
            ttl,
            sync_strategy,
            resolver: conflict_resolver,
            local,
            bus,
            key_codec,
            subscription: Mutex::new(subscription),
            writes: TaskTracker::new(),
            write_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    fn store_key(&self, key: &K) -> String {
        namespaced(&self.name, &(self.key_mapper)(key))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read through L1, then L2, populating L1 on an L2 hit
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.read(key, true).await
    }

    async fn read(&self, key: &K, populate: bool) -> Result<Option<V>> {
        if let Some(local) = &self.local {
            if let Some(value) = local.get(key) {
                return Ok(Some(value));
            }
        }

        let store_key = self.store_key(key);
        let Some(payload) = self.store.get(&store_key).await? else {
            debug!(cache = %self.name, key = %store_key, "miss");
            return Ok(None);
        };
        let value = self.codec.deserialize(&payload)?;

        if populate {
            if let Some(local) = &self.local {
                local.put(key.clone(), value.clone());
                local.record_load();
                debug!(cache = %self.name, key = %store_key, "populated L1 from store");
            }
        }
        Ok(Some(value))
    }

    /// Read several keys; absent keys are omitted from the result
    pub async fn get_all<I>(&self, keys: I) -> Result<HashMap<K, V>>
    where
        I: IntoIterator<Item = K>,
    {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a value through both tiers.
    ///
    /// Returns `false` when the conflict resolver suppressed the write; neither
    /// tier is touched in that case.
    pub async fn put(&self, key: K, value: V) -> Result<bool> {
        let value = match &self.resolver {
            Some(resolver) => {
                let existing = self.read(&key, false).await?;
                match resolver.resolve(existing.as_ref(), value) {
                    Some(resolved) => resolved,
                    None => {
                        debug!(cache = %self.name, key = %self.store_key(&key), "write suppressed by resolver");
                        return Ok(false);
                    }
                }
            }
            None => value,
        };

        let store_key = self.store_key(&key);

        if self.sync_strategy.is_synchronous() {
            let payload = self.codec.serialize(&value)?;
            if let Some(local) = &self.local {
                local.put(key, value);
            }
            write_to_store(self.store.as_ref(), &store_key, payload, self.ttl).await?;
            return Ok(true);
        }

        if let Some(local) = &self.local {
            local.put(key, value.clone());
        }

        let store = Arc::clone(&self.store);
        let codec = Arc::clone(&self.codec);
        let failures = Arc::clone(&self.write_failures);
        let cache = self.name.clone();
        let ttl = self.ttl;

        self.writes.spawn(async move {
            let outcome = match codec.serialize(&value) {
                Ok(payload) => write_to_store(store.as_ref(), &store_key, payload, ttl).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cache = %cache,
                    key = %store_key,
                    operation = "put",
                    error = %e,
                    "background store write failed"
                );
            }
        });

        Ok(true)
    }

    /// Write several entries; returns how many were not suppressed
    pub async fn put_all<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut written = 0;
        for (key, value) in entries {
            if self.put(key, value).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Drop a key from both tiers and tell peers to evict it.
    ///
    /// Returns whether the store held the key. Peers are notified even when
    /// the store delete fails; that error is then returned.
    pub async fn invalidate(&self, key: &K) -> Result<bool> {
        if let Some(local) = &self.local {
            local.invalidate(key);
        }

        let deleted = self.store.delete(&self.store_key(key)).await;

        if let Some(encoded) = self.encode_for_bus(key) {
            self.broadcast(InvalidationScope::Single { key: encoded }).await;
        }
        deleted
    }

    /// Drop a batch of keys individually and notify peers with one message.
    ///
    /// Returns how many keys the store held.
    pub async fn invalidate_many<I>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(0);
        }

        if let Some(local) = &self.local {
            local.invalidate_many(&keys);
        }

        let mut deleted = 0u64;
        let mut first_error = None;
        for key in &keys {
            match self.store.delete(&self.store_key(key)).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(cache = %self.name, key = %self.store_key(key), error = %e, "store delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.bus.is_some() {
            let encoded: Vec<String> = keys.iter().filter_map(|k| self.encode_for_bus(k)).collect();
            if !encoded.is_empty() {
                self.broadcast(InvalidationScope::Multiple { keys: encoded }).await;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    /// Clear L1, delete every store key under this cache's namespace and tell
    /// peers to clear theirs. Returns how many store keys were removed.
    pub async fn invalidate_all(&self) -> Result<u64> {
        if let Some(local) = &self.local {
            local.invalidate_all();
        }

        let removed = self
            .store
            .delete_by_pattern(&namespace_pattern(&self.name))
            .await;

        self.broadcast(InvalidationScope::All).await;

        let removed = removed?;
        info!(cache = %self.name, removed, "invalidated all entries");
        Ok(removed)
    }

    fn encode_for_bus(&self, key: &K) -> Option<String> {
        let key_codec = self.key_codec.as_ref()?;
        match key_codec.encode(key) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(cache = %self.name, key = %self.store_key(key), error = %e, "cannot encode key for invalidation");
                None
            }
        }
    }

    /// Publish on the bus; failures are logged, never returned
    async fn broadcast(&self, scope: InvalidationScope) {
        let Some(bus) = &self.bus else {
            return;
        };
        let kind = scope.kind();
        if let Err(e) = bus.publish(scope).await {
            warn!(cache = %self.name, scope = kind, error = %e, "invalidation broadcast failed");
        }
    }
}

impl<K: Eq + Hash, V> DistributedCache<K, V> {
    /// L1 statistics, or empty stats when L1 is disabled
    pub fn stats(&self) -> CacheStats {
        self.local
            .as_ref()
            .map(|local| local.stats())
            .unwrap_or_else(CacheStats::empty)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local_enabled(&self) -> bool {
        self.local.is_some()
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        self.sync_strategy
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// The L1 tier, if enabled
    pub fn local(&self) -> Option<&Arc<LocalCache<K, V>>> {
        self.local.as_ref()
    }

    /// Number of L1 entries (0 without L1)
    pub fn local_size(&self) -> usize {
        self.local.as_ref().map_or(0, |local| local.size())
    }

    /// Bus counters, if a bus is attached
    pub fn bus_stats(&self) -> Option<BusStats> {
        self.bus.as_ref().map(|bus| bus.stats())
    }

    /// Whether a bus listener is currently attached
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .map_or(false, |subscription| subscription.is_active())
    }

    /// Background writes that failed since construction
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Background writes still in flight
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Wait for every outstanding asynchronous write
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Detach from the bus and drain background writes
    pub async fn shutdown(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }
        self.flush().await;
        info!(cache = %self.name, "distributed cache shut down");
    }
}

impl<K: Eq + Hash, V> fmt::Debug for DistributedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("sync_strategy", &self.sync_strategy)
            .field("local", &self.local)
            .field("bus", &self.bus)
            .finish()
    }
}

async fn write_to_store(
    store: &dyn NetworkedStore,
    key: &str,
    payload: Bytes,
    ttl: Option<Duration>,
) -> Result<()> {
    match ttl {
        Some(ttl) => store.set_with_ttl(key, payload, ttl).await,
        None => store.set(key, payload).await,
    }
}

/// Applies received invalidations to the local tier, evicting exactly the
/// named keys. Keys that cannot be decoded are skipped.
fn eviction_handler<K, V>(
    cache: String,
    local: Arc<LocalCache<K, V>>,
    key_codec: Arc<dyn KeyCodec<K>>,
) -> impl Fn(InvalidationScope) + Send + Sync + 'static
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let decode = move |encoded: &str| match key_codec.decode(encoded) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!(cache = %cache, key = %encoded, error = %e, "skipping undecodable invalidation key");
            None
        }
    };

    move |scope: InvalidationScope| match scope {
        InvalidationScope::Single { key } => {
            if let Some(key) = decode(key.as_str()) {
                local.invalidate(&key);
            }
        }
        InvalidationScope::Multiple { keys } => {
            let keys: Vec<K> = keys.iter().filter_map(|k| decode(k.as_str())).collect();
            local.invalidate_many(&keys);
        }
        InvalidationScope::All => local.invalidate_all(),
    }
}

// =============================================================================
// Tests
// =============================================================================
