//! Cross-Process Invalidation
//!
//! Announces "this key (or every key) in region X is stale" over a shared
//! pub/sub channel so peer processes evict their own L1 copies.
//!
//! # Flow
//!
//! ```text
//! Process A: cache.invalidate(k)
//!   ↓  L1 evict, L2 delete
//! PUBLISH tiercache:invalidate {"id":"...","region":"players","origin":"a","scope":{"type":"single","key":"..."}}
//!   ↓
//! Process B: listener decodes key → evicts exactly k from its L1
//! Process C: listener decodes key → evicts exactly k from its L1
//! ```
//!
//! Keys travel as opaque strings produced by the cache's
//! [`KeyCodec`](super::codec::KeyCodec), which is reversible, so a receiver can
//! always rebuild the typed key and evict only that entry. A message that
//! cannot be decoded is logged and dropped; it never clears the whole cache.
//!
//! Delivery is best-effort: no acknowledgement, no replay, messages can be lost
//! while a listener reconnects. L2 TTLs remain the backstop against staleness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{MessageHandler, NetworkedStore, Subscription};

/// Default invalidation channel
pub const DEFAULT_INVALIDATION_CHANNEL: &str = "tiercache:invalidate";

static PROCESS_SERVER_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().to_string());

/// Random identifier generated once per process.
///
/// Caches that share it recognise each other's messages as their own.
pub fn process_server_id() -> &'static str {
    PROCESS_SERVER_ID.as_str()
}

/// What an invalidation message covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InvalidationScope {
    /// One key
    Single { key: String },
    /// A batch of keys
    Multiple { keys: Vec<String> },
    /// Every key in the region
    All,
}

impl InvalidationScope {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidationScope::Single { .. } => "single",
            InvalidationScope::Multiple { .. } => "multiple",
            InvalidationScope::All => "all",
        }
    }
}

/// Invalidation message as published on the bus.
///
/// Always names exactly one region; `All` is confined to that region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Unique message id for log correlation
    pub id: Uuid,
    /// Cache region (cache name) the message applies to
    pub region: String,
    /// Server id of the publishing process
    pub origin: String,
    pub scope: InvalidationScope,
}

impl InvalidationMessage {
    /// Create a message
    pub fn new(region: impl Into<String>, origin: impl Into<String>, scope: InvalidationScope) -> Self {
        Self {
            id: Uuid::new_v4(),
            region: region.into(),
            origin: origin.into(),
            scope,
        }
    }

    /// Encode for transport
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Invalidation(format!("encode: {}", e)))
    }

    /// Decode from transport
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Invalidation(format!("decode: {}", e)))
    }
}

/// Bus counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Messages this process published
    pub published: u64,
    /// Messages received for this region (own messages included)
    pub received: u64,
    /// Messages handed to the handler
    pub applied: u64,
    /// Messages dropped as undecodable
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    received: AtomicU64,
    applied: AtomicU64,
    dropped: AtomicU64,
}

impl BusCounters {
    fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Invalidation bus for one region
pub struct InvalidationBus {
    store: Arc<dyn NetworkedStore>,
    channel: String,
    region: String,
    server_id: String,
    ignore_own_messages: bool,
    counters: Arc<BusCounters>,
}

impl InvalidationBus {
    /// Create a bus publishing on `channel` for `region`
    pub fn new(
        store: Arc<dyn NetworkedStore>,
        channel: impl Into<String>,
        region: impl Into<String>,
        server_id: impl Into<String>,
        ignore_own_messages: bool,
    ) -> Self {
        Self {
            store,
            channel: channel.into(),
            region: region.into(),
            server_id: server_id.into(),
            ignore_own_messages,
            counters: Arc::new(BusCounters::default()),
        }
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Region name
    pub fn region(&self) -> &str {
        &self.region
    }

    /// This process's server id
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Counters snapshot
    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }

    /// Publish a message for this region
    pub async fn publish(&self, scope: InvalidationScope) -> Result<()> {
        let message = InvalidationMessage::new(&self.region, &self.server_id, scope);
        let payload = message.encode()?;

        self.store
            .publish(&self.channel, payload)
            .await
            .map_err(|e| Error::Invalidation(format!("publish on '{}': {}", self.channel, e)))?;

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            region = %self.region,
            id = %message.id,
            scope = message.scope.kind(),
            "published invalidation"
        );
        Ok(())
    }

    /// Announce one stale key
    pub async fn invalidate(&self, key: String) -> Result<()> {
        self.publish(InvalidationScope::Single { key }).await
    }

    /// Announce a batch of stale keys as a single message
    pub async fn invalidate_many(&self, keys: Vec<String>) -> Result<()> {
        match keys.len() {
            0 => Ok(()),
            1 => {
                let key = keys.into_iter().next().unwrap_or_default();
                self.invalidate(key).await
            }
            _ => self.publish(InvalidationScope::Multiple { keys }).await,
        }
    }

    /// Announce that the whole region is stale
    pub async fn invalidate_all(&self) -> Result<()> {
        self.publish(InvalidationScope::All).await
    }

    /// Register `handler` for messages addressed to this region.
    ///
    /// Messages for other regions are ignored. When `ignore_own_messages` is
    /// set, messages this process published are skipped as well, since the
    /// publishing call already evicted locally.
    pub async fn subscribe<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(InvalidationScope) + Send + Sync + 'static,
    {
        let region = self.region.clone();
        let server_id = self.server_id.clone();
        let ignore_own = self.ignore_own_messages;
        let counters = Arc::clone(&self.counters);

        let on_message: MessageHandler = Arc::new(move |payload: Bytes| {
            let message = match InvalidationMessage::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(region = %region, error = %e, "dropping undecodable invalidation message");
                    return;
                }
            };

            if message.region != region {
                return;
            }
            counters.received.fetch_add(1, Ordering::Relaxed);

            if ignore_own && message.origin == server_id {
                return;
            }

            debug!(
                region = %region,
                id = %message.id,
                origin = %message.origin,
                scope = message.scope.kind(),
                "received invalidation"
            );
            counters.applied.fetch_add(1, Ordering::Relaxed);
            handler(message.scope);
        });

        self.store
            .subscribe(&self.channel, on_message)
            .await
            .map_err(|e| Error::Invalidation(format!("subscribe to '{}': {}", self.channel, e)))
    }
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("channel", &self.channel)
            .field("region", &self.region)
            .field("server_id", &self.server_id)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
