//! In-memory networked store.
//!
//! Process-local stand-in for a shared key/value service. Multiple caches in
//! one process share it through an `Arc`, which is how multi-instance
//! behaviour is exercised in tests. Pub/sub uses one `tokio` broadcast channel
//! per channel name; slow subscribers lose messages, matching the best-effort
//! delivery of a real bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::glob::glob_match;
use super::{MessageHandler, NetworkedStore, Subscription};
use crate::error::{Error, Result};

/// Default per-channel buffer before slow subscribers start lagging
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// In-memory store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    pub keys: usize,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub publishes: u64,
}

/// In-memory [`NetworkedStore`]
pub struct InMemoryStore {
    data: DashMap<String, StoredValue>,
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    channel_capacity: usize,
    /// Fault switch: when false every operation fails as unreachable
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    publishes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom per-channel buffer
    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            data: DashMap::new(),
            channels: DashMap::new(),
            channel_capacity: channel_capacity.max(1),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
        }
    }

    /// Simulate the store going offline (`false`) or recovering (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a live value exists, without counting a read
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data
            .get(key)
            .map_or(false, |value| !value.is_expired(now))
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .iter()
            .filter(|item| !item.value().is_expired(now))
            .count()
    }

    /// Check if no live keys are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics
    pub fn stats(&self) -> InMemoryStoreStats {
        InMemoryStoreStats {
            keys: self.len(),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("in-memory store is offline".into()))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }

    fn insert(&self, key: &str, data: Bytes, expires_at: Option<Instant>) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.data
            .insert(key.to_string(), StoredValue { data, expires_at });
    }
}

#[async_trait]
impl NetworkedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let expired = match self.data.get(key) {
            Some(value) if !value.is_expired(now) => return Ok(Some(value.data.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.data.remove_if(key, |_, value| value.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.check_available()?;
        self.insert(key, value, None);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.insert(key, value, Some(Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .map_or(false, |(_, value)| !value.is_expired(now)))
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.check_available()?;

        let now = Instant::now();
        let mut removed = 0u64;
        self.data.retain(|key, value| {
            if !glob_match(pattern, key) {
                return true;
            }
            if !value.is_expired(now) {
                removed += 1;
            }
            false
        });

        self.deletes.fetch_add(removed, Ordering::Relaxed);
        debug!(pattern = %pattern, removed, "deleted keys by pattern");
        Ok(removed)
    }

    async fn publish(&self, channel: &str, message: Bytes) -> Result<()> {
        self.check_available()?;
        self.publishes.fetch_add(1, Ordering::Relaxed);

        // No receivers is not an error: nobody is listening yet
        let _ = self.sender(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        self.check_available()?;

        let mut rx = self.sender(channel).subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = channel.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(message) => handler(message),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %name, skipped, "subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(channel = %name, "subscription closed");
        });

        Ok(Subscription::new(channel, cancel, task))
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

// =============================================================================
// Tests
// =============================================================================
